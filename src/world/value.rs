//! Representation of Scheme values
use core::fmt;
use std::{cell::RefCell, rc::Rc};

use crate::{
    compiler::{bytecode::Template, environment::Environment},
    num::Number,
    runtime::{
        external::{Displayed, Written},
        Procedure,
    },
};

use super::symbol::Symbol;

pub use port::{OutputPort, Writeable};

mod port;

// Type that stores all possible values!
#[derive(Clone, Default)]
pub enum Value {
    // This is the value written as ()
    #[default]
    Nil,
    // the value of set!, and of `if` without an alternate
    Unspecified,
    // a reserved binding nobody has assigned yet; reading one is an error
    Undefined,
    Boolean(bool),
    Character(char),
    String(Rc<RefCell<String>>),
    Symbol(Symbol),
    Pair(Rc<Pair>),
    Vector(Rc<RefCell<Vec<Value>>>),
    Number(Rc<Number>),
    /// A compiled lambda that has not captured an environment yet
    Template(Rc<Template>),
    Procedure(Procedure),
    /// More (or less) than one value, as produced by `values`
    Values(Rc<[Value]>),
    Environment(Environment),
    Port(OutputPort),
}

/// A mutable cons cell
pub struct Pair {
    car: RefCell<Value>,
    cdr: RefCell<Value>,
}

impl Pair {
    pub fn new(car: Value, cdr: Value) -> Self {
        Self {
            car: RefCell::new(car),
            cdr: RefCell::new(cdr),
        }
    }

    pub fn car(&self) -> Value {
        self.car.borrow().clone()
    }

    pub fn cdr(&self) -> Value {
        self.cdr.borrow().clone()
    }

    pub fn set_car(&self, value: Value) {
        // the old value drops after the borrow ends
        let _old = self.car.replace(value);
    }

    pub fn set_cdr(&self, value: Value) {
        let _old = self.cdr.replace(value);
    }
}

// Long lists would otherwise drop recursively, one host frame per pair.
impl Drop for Pair {
    fn drop(&mut self) {
        let mut pending: Vec<Value> = [self.car.take(), self.cdr.take()]
            .into_iter()
            .filter(|v| matches!(v, Value::Pair(_)))
            .collect();
        while let Some(value) = pending.pop() {
            if let Value::Pair(pair) = value {
                if let Ok(pair) = Rc::try_unwrap(pair) {
                    for inner in [pair.car.take(), pair.cdr.take()] {
                        if matches!(inner, Value::Pair(_)) {
                            pending.push(inner);
                        }
                    }
                }
            }
        }
    }
}

impl Value {
    pub fn string(text: &str) -> Self {
        Self::String(Rc::new(RefCell::new(text.to_owned())))
    }

    pub fn number(number: impl Into<Number>) -> Self {
        Self::Number(Rc::new(number.into()))
    }

    pub fn symbol(name: &str) -> Self {
        Self::Symbol(Symbol::intern(name))
    }

    pub fn cons(car: Value, cdr: Value) -> Self {
        Self::Pair(Rc::new(Pair::new(car, cdr)))
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::list_with_tail(items, Value::Nil)
    }

    pub fn list_with_tail(items: impl IntoIterator<Item = Value>, tail: Value) -> Self {
        let items: Vec<_> = items.into_iter().collect();
        items
            .into_iter()
            .rev()
            .fold(tail, |cdr, car| Value::cons(car, cdr))
    }

    pub fn vector(items: Vec<Value>) -> Self {
        Self::Vector(Rc::new(RefCell::new(items)))
    }

    /// Bundles results for a continuation; a single value stays unbundled.
    pub fn values(mut items: Vec<Value>) -> Self {
        if items.len() == 1 {
            items.pop().unwrap_or_default()
        } else {
            Self::Values(items.into())
        }
    }

    /// Everything except `#f` counts as true
    pub fn is_true(&self) -> bool {
        !matches!(self, Self::Boolean(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "empty list",
            Self::Unspecified => "unspecified",
            Self::Undefined => "undefined",
            Self::Boolean(_) => "boolean",
            Self::Character(_) => "character",
            Self::String(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Pair(_) => "pair",
            Self::Vector(_) => "vector",
            Self::Number(_) => "number",
            Self::Template(_) => "procedure template",
            Self::Procedure(_) => "procedure",
            Self::Values(_) => "multiple values",
            Self::Environment(_) => "environment",
            Self::Port(_) => "port",
        }
    }

    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            Self::Symbol(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&Number> {
        match self {
            Self::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<&Rc<Pair>> {
        match self {
            Self::Pair(p) => Some(p),
            _ => None,
        }
    }

    pub fn car(&self) -> Option<Value> {
        self.as_pair().map(|p| p.car())
    }

    pub fn cdr(&self) -> Option<Value> {
        self.as_pair().map(|p| p.cdr())
    }

    /// `eq?`: same object. Small immediates (booleans, characters, symbols,
    /// the empty list) are always the same object, and so are equal numbers.
    pub fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil)
            | (Self::Unspecified, Self::Unspecified)
            | (Self::Undefined, Self::Undefined) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Character(a), Self::Character(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::String(a), Self::String(b)) => Rc::ptr_eq(a, b),
            (Self::Pair(a), Self::Pair(b)) => Rc::ptr_eq(a, b),
            (Self::Vector(a), Self::Vector(b)) => Rc::ptr_eq(a, b),
            (Self::Number(a), Self::Number(b)) => Rc::ptr_eq(a, b) || a.eqv(b),
            (Self::Template(a), Self::Template(b)) => Rc::ptr_eq(a, b),
            (Self::Procedure(a), Self::Procedure(b)) => a.ptr_eq(b),
            (Self::Values(a), Self::Values(b)) => Rc::ptr_eq(a, b),
            (Self::Environment(a), Self::Environment(b)) => a.ptr_eq(b),
            (Self::Port(a), Self::Port(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// `eqv?`. Numbers compare by value and exactness.
    pub fn eqv(&self, other: &Self) -> bool {
        self.eq(other)
    }

    /// `equal?`: structural equality through pairs, vectors and strings.
    /// Nesting is walked with an explicit stack; cyclic structure does not
    /// terminate.
    pub fn equal(&self, other: &Self) -> bool {
        let mut pending = vec![(self.clone(), other.clone())];
        while let Some((left, right)) = pending.pop() {
            match (&left, &right) {
                (Self::Pair(a), Self::Pair(b)) => {
                    if !Rc::ptr_eq(a, b) {
                        pending.push((a.cdr(), b.cdr()));
                        pending.push((a.car(), b.car()));
                    }
                }
                (Self::String(a), Self::String(b)) => {
                    if *a.borrow() != *b.borrow() {
                        return false;
                    }
                }
                (Self::Vector(a), Self::Vector(b)) => {
                    if Rc::ptr_eq(a, b) {
                        continue;
                    }
                    let (a, b) = (a.borrow(), b.borrow());
                    if a.len() != b.len() {
                        return false;
                    }
                    pending.extend(a.iter().cloned().zip(b.iter().cloned()).rev());
                }
                (a, b) => {
                    if !a.eqv(b) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Whether this is a proper list. Cycle-safe.
    pub fn is_list(&self) -> bool {
        let mut slow = self.clone();
        let mut fast = self.clone();
        loop {
            for _ in 0..2 {
                fast = match &fast {
                    Self::Nil => return true,
                    Self::Pair(p) => p.cdr(),
                    _ => return false,
                };
            }
            slow = match &slow {
                Self::Pair(p) => p.cdr(),
                _ => return false,
            };
            if let (Self::Pair(a), Self::Pair(b)) = (&slow, &fast) {
                if Rc::ptr_eq(a, b) {
                    return false;
                }
            }
        }
    }

    /// Splits a (possibly improper) list into its elements and final cdr.
    /// Returns `None` for circular lists.
    pub fn list_parts(&self) -> Option<(Vec<Value>, Value)> {
        let mut items = vec![];
        let mut hare = self.clone();
        let mut tortoise = self.clone();
        loop {
            let next = match &hare {
                Self::Pair(pair) => {
                    items.push(pair.car());
                    pair.cdr()
                }
                _ => return Some((items, hare)),
            };
            hare = next;
            if items.len() % 2 == 0 {
                tortoise = tortoise.cdr().unwrap_or_default();
                if let (Self::Pair(a), Self::Pair(b)) = (&tortoise, &hare) {
                    if Rc::ptr_eq(a, b) {
                        return None;
                    }
                }
            }
        }
    }

    /// The elements of a proper list
    pub fn proper_list(&self) -> Option<Vec<Value>> {
        match self.list_parts()? {
            (items, Self::Nil) => Some(items),
            _ => None,
        }
    }

    /// Adapter printing the `display` form
    pub fn display(&self) -> Displayed<'_> {
        Displayed(self)
    }

    /// Adapter printing the `write` form (also what [`fmt::Display`] prints)
    pub fn write(&self) -> Written<'_> {
        Written(self)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Number> for Value {
    fn from(value: Number) -> Self {
        Self::number(value)
    }
}

impl From<Symbol> for Value {
    fn from(value: Symbol) -> Self {
        Self::Symbol(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Written(self), f)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Written(self), f)
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::Value;

    fn list_of(names: &[&str]) -> Value {
        Value::list(names.iter().map(|n| Value::symbol(n)))
    }

    #[test]
    fn identity_semantics() {
        check!(Value::symbol("a").eq(&Value::symbol("a")));
        check!(!list_of(&["a"]).eq(&list_of(&["a"])));
        check!(list_of(&["a"]).equal(&list_of(&["a"])));
        check!(!Value::string("s").eqv(&Value::string("s")));
        check!(Value::string("s").equal(&Value::string("s")));
        check!(Value::number(2i64).eqv(&Value::number(2i64)));
        check!(!Value::number(2i64).eqv(&Value::number(2.0)));
    }

    #[test]
    fn cyclic_lists_are_not_lists() {
        let list = list_of(&["a", "b", "c"]);
        check!(list.is_list());
        let last = list.cdr().and_then(|v| v.cdr());
        if let Some(Value::Pair(last)) = last {
            last.set_cdr(list.clone());
        }
        check!(!list.is_list());
        check!(list.list_parts().is_none());
        // break the cycle so the test does not leak
        if let Value::Pair(head) = &list {
            head.set_cdr(Value::Nil);
        }
    }

    #[test]
    fn improper_lists() {
        let dotted = Value::list_with_tail([Value::symbol("a")], Value::symbol("b"));
        check!(!dotted.is_list());
        let parts = dotted.list_parts();
        check!(parts.as_ref().map(|(items, _)| items.len()) == Some(1));
        check!(dotted.proper_list().is_none());
    }

    #[test]
    fn equal_walks_deep_nesting() {
        let nested = |leaf: &str| {
            (0..200_000).fold(Value::symbol(leaf), |inner, _| {
                Value::cons(inner, Value::Nil)
            })
        };
        check!(nested("a").equal(&nested("a")));
        check!(!nested("a").equal(&nested("b")));

        let vectors = |leaf: i64| Value::vector(vec![Value::list([Value::number(leaf)]), Value::Nil]);
        check!(vectors(1).equal(&vectors(1)));
        check!(!vectors(1).equal(&vectors(2)));
        check!(!Value::vector(vec![Value::Nil]).equal(&Value::vector(vec![])));
    }

    #[test]
    fn long_lists_drop_without_recursion() {
        let long = Value::list((0..200_000i64).map(Value::number));
        check!(long.is_list());
        drop(long);
    }
}
