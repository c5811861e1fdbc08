//! Equivalence predicates, pairs and lists, and vectors
use std::rc::Rc;

use crate::{
    num::Number,
    runtime::{Arity, Builtin, Context, RuntimeError},
    world::value::{Pair, Value},
};

use super::{arguments, builtin, in_range, index, list, value, vector, Output};

pub(super) static BUILTINS: &[Builtin] = &[
    builtin("eq?", Arity::Exact(2), eq),
    builtin("eqv?", Arity::Exact(2), eqv),
    builtin("equal?", Arity::Exact(2), equal),
    builtin("not", Arity::Exact(1), not),
    builtin("boolean?", Arity::Exact(1), is_boolean),
    builtin("boolean=?", Arity::Min(2), boolean_eq),
    builtin("cons", Arity::Exact(2), cons),
    builtin("car", Arity::Exact(1), car),
    builtin("cdr", Arity::Exact(1), cdr),
    builtin("set-car!", Arity::Exact(2), set_car),
    builtin("set-cdr!", Arity::Exact(2), set_cdr),
    builtin("caar", Arity::Exact(1), caar),
    builtin("cadr", Arity::Exact(1), cadr),
    builtin("cdar", Arity::Exact(1), cdar),
    builtin("cddr", Arity::Exact(1), cddr),
    builtin("pair?", Arity::Exact(1), is_pair),
    builtin("null?", Arity::Exact(1), is_null),
    builtin("list?", Arity::Exact(1), is_list),
    builtin("list", Arity::Min(0), make_list_of),
    builtin("make-list", Arity::Between(1, 2), make_list),
    builtin("length", Arity::Exact(1), length),
    builtin("append", Arity::Min(0), append),
    builtin("reverse", Arity::Exact(1), reverse),
    builtin("list-tail", Arity::Exact(2), list_tail),
    builtin("list-ref", Arity::Exact(2), list_ref),
    builtin("list-copy", Arity::Exact(1), list_copy),
    builtin("memq", Arity::Exact(2), memq),
    builtin("memv", Arity::Exact(2), memv),
    builtin("member", Arity::Exact(2), member),
    builtin("assq", Arity::Exact(2), assq),
    builtin("assv", Arity::Exact(2), assv),
    builtin("assoc", Arity::Exact(2), assoc),
    builtin("vector?", Arity::Exact(1), is_vector),
    builtin("make-vector", Arity::Between(1, 2), make_vector),
    builtin("vector", Arity::Min(0), make_vector_of),
    builtin("vector-length", Arity::Exact(1), vector_length),
    builtin("vector-ref", Arity::Exact(2), vector_ref),
    builtin("vector-set!", Arity::Exact(3), vector_set),
    builtin("vector->list", Arity::Between(1, 3), vector_to_list),
    builtin("list->vector", Arity::Exact(1), list_to_vector),
    builtin("vector-fill!", Arity::Between(2, 4), vector_fill),
];

fn eq(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [a, b] = arguments("eq?", args)?;
    value(a.eq(&b))
}

fn eqv(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [a, b] = arguments("eqv?", args)?;
    value(a.eqv(&b))
}

fn equal(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [a, b] = arguments("equal?", args)?;
    value(a.equal(&b))
}

fn not(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("not", args)?;
    value(!x.is_true())
}

fn is_boolean(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("boolean?", args)?;
    value(matches!(x, Value::Boolean(_)))
}

fn boolean_eq(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let mut booleans = vec![];
    for arg in &args {
        match arg {
            Value::Boolean(b) => booleans.push(*b),
            other => return Err(RuntimeError::wrong_type("boolean=?", "a boolean", other)),
        }
    }
    value(booleans.windows(2).all(|pair| pair.first() == pair.last()))
}

fn pair<'v>(operation: &'static str, value: &'v Value) -> Result<&'v Rc<Pair>, RuntimeError> {
    value
        .as_pair()
        .ok_or_else(|| RuntimeError::wrong_type(operation, "a pair", value))
}

fn cons(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [car, cdr] = arguments("cons", args)?;
    value(Value::cons(car, cdr))
}

fn car(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("car", args)?;
    value(pair("car", &x)?.car())
}

fn cdr(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("cdr", args)?;
    value(pair("cdr", &x)?.cdr())
}

fn set_car(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x, car] = arguments("set-car!", args)?;
    pair("set-car!", &x)?.set_car(car);
    value(Value::Unspecified)
}

fn set_cdr(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x, cdr] = arguments("set-cdr!", args)?;
    pair("set-cdr!", &x)?.set_cdr(cdr);
    value(Value::Unspecified)
}

// `path` is read right to left, as in the name: cadr is (car (cdr x))
fn walk(operation: &'static str, args: Vec<Value>, path: &str) -> Output {
    let [mut x] = arguments(operation, args)?;
    for step in path.chars().rev() {
        let pair = pair(operation, &x)?.clone();
        x = if step == 'a' { pair.car() } else { pair.cdr() };
    }
    value(x)
}

fn caar(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    walk("caar", args, "aa")
}

fn cadr(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    walk("cadr", args, "ad")
}

fn cdar(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    walk("cdar", args, "da")
}

fn cddr(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    walk("cddr", args, "dd")
}

fn is_pair(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("pair?", args)?;
    value(matches!(x, Value::Pair(_)))
}

fn is_null(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("null?", args)?;
    value(matches!(x, Value::Nil))
}

fn is_list(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("list?", args)?;
    value(x.is_list())
}

fn make_list_of(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    value(Value::list(args))
}

fn make_list(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let mut args = args.into_iter();
    let count = index("make-list", &args.next().unwrap_or_default())?;
    let fill = args.next().unwrap_or(Value::Unspecified);
    value(Value::list(std::iter::repeat(fill).take(count)))
}

fn length(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("length", args)?;
    value(Number::from(list("length", &x)?.len()))
}

fn append(_: &mut Context<'_>, mut args: Vec<Value>) -> Output {
    let Some(tail) = args.pop() else {
        return value(Value::Nil);
    };
    let mut items = vec![];
    for arg in &args {
        items.extend(list("append", arg)?);
    }
    value(Value::list_with_tail(items, tail))
}

fn reverse(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("reverse", args)?;
    value(Value::list(list("reverse", &x)?.into_iter().rev()))
}

fn list_tail(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [mut x, k] = arguments("list-tail", args)?;
    for _ in 0..index("list-tail", &k)? {
        x = pair("list-tail", &x)?.cdr();
    }
    value(x)
}

fn list_ref(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [mut x, k] = arguments("list-ref", args)?;
    for _ in 0..index("list-ref", &k)? {
        x = pair("list-ref", &x)?.cdr();
    }
    value(pair("list-ref", &x)?.car())
}

fn list_copy(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("list-copy", args)?;
    match x.list_parts() {
        Some((items, tail)) => value(Value::list_with_tail(items, tail)),
        None => Err(RuntimeError::wrong_type("list-copy", "an acyclic list", &x)),
    }
}

// the first sublist whose car satisfies `matches`
fn find_tail(operation: &'static str, list: Value, matches: impl Fn(&Value) -> bool) -> Output {
    if !list.is_list() {
        return Err(RuntimeError::wrong_type(operation, "a proper list", &list));
    }
    let mut cursor = list;
    while let Value::Pair(pair) = &cursor {
        if matches(&pair.car()) {
            return value(cursor);
        }
        let next = pair.cdr();
        cursor = next;
    }
    value(false)
}

fn memq(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x, list] = arguments("memq", args)?;
    find_tail("memq", list, |item| item.eq(&x))
}

fn memv(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x, list] = arguments("memv", args)?;
    find_tail("memv", list, |item| item.eqv(&x))
}

fn member(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x, list] = arguments("member", args)?;
    find_tail("member", list, |item| item.equal(&x))
}

fn find_entry(operation: &'static str, alist: &Value, matches: impl Fn(&Value) -> bool) -> Output {
    for entry in list(operation, alist)? {
        let key = pair(operation, &entry)?.car();
        if matches(&key) {
            return value(entry);
        }
    }
    value(false)
}

fn assq(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x, alist] = arguments("assq", args)?;
    find_entry("assq", &alist, |key| key.eq(&x))
}

fn assv(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x, alist] = arguments("assv", args)?;
    find_entry("assv", &alist, |key| key.eqv(&x))
}

fn assoc(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x, alist] = arguments("assoc", args)?;
    find_entry("assoc", &alist, |key| key.equal(&x))
}

fn is_vector(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("vector?", args)?;
    value(matches!(x, Value::Vector(_)))
}

fn make_vector(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let mut args = args.into_iter();
    let count = index("make-vector", &args.next().unwrap_or_default())?;
    let fill = args.next().unwrap_or(Value::Unspecified);
    value(Value::vector(vec![fill; count]))
}

fn make_vector_of(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    value(Value::vector(args))
}

fn vector_length(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [v] = arguments("vector-length", args)?;
    let len = vector("vector-length", &v)?.borrow().len();
    value(Number::from(len))
}

fn vector_ref(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [v, k] = arguments("vector-ref", args)?;
    let items = vector("vector-ref", &v)?.borrow();
    let k = in_range("vector-ref", &k, items.len())?;
    value(items.get(k).cloned().unwrap_or_default())
}

fn vector_set(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [v, k, item] = arguments("vector-set!", args)?;
    let mut items = vector("vector-set!", &v)?.borrow_mut();
    let k = in_range("vector-set!", &k, items.len())?;
    if let Some(slot) = items.get_mut(k) {
        *slot = item;
    }
    value(Value::Unspecified)
}

fn vector_to_list(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let Some((v, range)) = args.split_first() else {
        return value(Value::Nil);
    };
    let items = vector("vector->list", v)?.borrow();
    let (start, end) = super::span("vector->list", range.first(), range.get(1), items.len())?;
    value(Value::list(items[start..end].iter().cloned()))
}

fn list_to_vector(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("list->vector", args)?;
    value(Value::vector(list("list->vector", &x)?))
}

fn vector_fill(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [v, fill, range @ ..] = args.as_slice() else {
        return value(Value::Unspecified);
    };
    let mut items = vector("vector-fill!", v)?.borrow_mut();
    let (start, end) = super::span("vector-fill!", range.first(), range.get(1), items.len())?;
    for slot in &mut items[start..end] {
        *slot = fill.clone();
    }
    value(Value::Unspecified)
}
