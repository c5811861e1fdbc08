//! Symbols, characters and strings. String indices count characters, not bytes.
use icu_casemap::CaseMapper;

use crate::{
    num::Number,
    runtime::{Arity, Builtin, Context, RuntimeError},
    world::{symbol::Symbol, value::Value},
};

use super::{arguments, builtin, character, in_range, index, list, span, string, symbol, value, Output};

pub(super) static BUILTINS: &[Builtin] = &[
    builtin("symbol?", Arity::Exact(1), is_symbol),
    builtin("symbol->string", Arity::Exact(1), symbol_to_string),
    builtin("string->symbol", Arity::Exact(1), string_to_symbol),
    builtin("symbol=?", Arity::Min(2), symbol_eq),
    builtin("char?", Arity::Exact(1), is_char),
    builtin("char->integer", Arity::Exact(1), char_to_integer),
    builtin("integer->char", Arity::Exact(1), integer_to_char),
    builtin("char=?", Arity::Min(2), char_eq),
    builtin("char<?", Arity::Min(2), char_less),
    builtin("char>?", Arity::Min(2), char_greater),
    builtin("char<=?", Arity::Min(2), char_less_equal),
    builtin("char>=?", Arity::Min(2), char_greater_equal),
    builtin("char-upcase", Arity::Exact(1), char_upcase),
    builtin("char-downcase", Arity::Exact(1), char_downcase),
    builtin("char-foldcase", Arity::Exact(1), char_foldcase),
    builtin("char-alphabetic?", Arity::Exact(1), is_char_alphabetic),
    builtin("char-numeric?", Arity::Exact(1), is_char_numeric),
    builtin("char-whitespace?", Arity::Exact(1), is_char_whitespace),
    builtin("char-upper-case?", Arity::Exact(1), is_char_upper_case),
    builtin("char-lower-case?", Arity::Exact(1), is_char_lower_case),
    builtin("digit-value", Arity::Exact(1), digit_value),
    builtin("string?", Arity::Exact(1), is_string),
    builtin("make-string", Arity::Between(1, 2), make_string),
    builtin("string", Arity::Min(0), string_of),
    builtin("string-length", Arity::Exact(1), string_length),
    builtin("string-ref", Arity::Exact(2), string_ref),
    builtin("string-set!", Arity::Exact(3), string_set),
    builtin("substring", Arity::Exact(3), substring),
    builtin("string-append", Arity::Min(0), string_append),
    builtin("string-copy", Arity::Between(1, 3), string_copy),
    builtin("string->list", Arity::Between(1, 3), string_to_list),
    builtin("list->string", Arity::Exact(1), list_to_string),
    builtin("string=?", Arity::Min(2), string_eq),
    builtin("string<?", Arity::Min(2), string_less),
    builtin("string>?", Arity::Min(2), string_greater),
    builtin("string-upcase", Arity::Exact(1), string_upcase),
    builtin("string-downcase", Arity::Exact(1), string_downcase),
    builtin("string-foldcase", Arity::Exact(1), string_foldcase),
];

fn is_symbol(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("symbol?", args)?;
    value(matches!(x, Value::Symbol(_)))
}

fn symbol_to_string(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("symbol->string", args)?;
    value(Value::string(&symbol("symbol->string", &x)?.name()))
}

fn string_to_symbol(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("string->symbol", args)?;
    let name = string("string->symbol", &x)?.borrow().clone();
    value(Symbol::intern(&name))
}

fn symbol_eq(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let symbols = args
        .iter()
        .map(|arg| symbol("symbol=?", arg))
        .collect::<Result<Vec<_>, _>>()?;
    value(symbols.windows(2).all(|pair| pair.first() == pair.last()))
}

fn is_char(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("char?", args)?;
    value(matches!(x, Value::Character(_)))
}

fn char_to_integer(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [c] = arguments("char->integer", args)?;
    value(Number::integer(u32::from(character("char->integer", &c)?)))
}

fn integer_to_char(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [n] = arguments("integer->char", args)?;
    let c = n
        .as_number()
        .and_then(Number::to_i64)
        .and_then(|n| u32::try_from(n).ok())
        .and_then(char::from_u32)
        .ok_or_else(|| RuntimeError::wrong_type("integer->char", "a Unicode scalar value", &n))?;
    value(Value::Character(c))
}

fn compare_chars(operation: &'static str, args: &[Value], accept: fn(char, char) -> bool) -> Output {
    let chars = args
        .iter()
        .map(|arg| character(operation, arg))
        .collect::<Result<Vec<_>, _>>()?;
    value(chars.windows(2).all(|pair| match pair {
        [a, b] => accept(*a, *b),
        _ => true,
    }))
}

fn char_eq(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    compare_chars("char=?", &args, |a, b| a == b)
}

fn char_less(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    compare_chars("char<?", &args, |a, b| a < b)
}

fn char_greater(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    compare_chars("char>?", &args, |a, b| a > b)
}

fn char_less_equal(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    compare_chars("char<=?", &args, |a, b| a <= b)
}

fn char_greater_equal(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    compare_chars("char>=?", &args, |a, b| a >= b)
}

fn map_char(operation: &'static str, args: Vec<Value>, map: impl Fn(&CaseMapper, char) -> char) -> Output {
    let [c] = arguments(operation, args)?;
    let c = character(operation, &c)?;
    value(Value::Character(map(&CaseMapper::new(), c)))
}

fn char_upcase(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    map_char("char-upcase", args, |cm, c| cm.simple_uppercase(c))
}

fn char_downcase(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    map_char("char-downcase", args, |cm, c| cm.simple_lowercase(c))
}

fn char_foldcase(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    map_char("char-foldcase", args, |cm, c| cm.simple_fold(c))
}

fn test_char(operation: &'static str, args: Vec<Value>, test: fn(char) -> bool) -> Output {
    let [c] = arguments(operation, args)?;
    value(test(character(operation, &c)?))
}

fn is_char_alphabetic(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    test_char("char-alphabetic?", args, char::is_alphabetic)
}

fn is_char_numeric(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    test_char("char-numeric?", args, char::is_numeric)
}

fn is_char_whitespace(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    test_char("char-whitespace?", args, char::is_whitespace)
}

fn is_char_upper_case(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    test_char("char-upper-case?", args, char::is_uppercase)
}

fn is_char_lower_case(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    test_char("char-lower-case?", args, char::is_lowercase)
}

fn digit_value(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [c] = arguments("digit-value", args)?;
    match character("digit-value", &c)?.to_digit(10) {
        Some(digit) => value(Number::integer(digit)),
        None => value(false),
    }
}

fn is_string(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("string?", args)?;
    value(matches!(x, Value::String(_)))
}

fn make_string(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [count, fill @ ..] = args.as_slice() else {
        return value(Value::string(""));
    };
    let count = index("make-string", count)?;
    let fill = match fill.first() {
        Some(c) => character("make-string", c)?,
        None => ' ',
    };
    value(Value::string(&std::iter::repeat(fill).take(count).collect::<String>()))
}

fn string_of(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let text = args
        .iter()
        .map(|arg| character("string", arg))
        .collect::<Result<String, _>>()?;
    value(Value::string(&text))
}

fn string_length(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [s] = arguments("string-length", args)?;
    let len = string("string-length", &s)?.borrow().chars().count();
    value(Number::from(len))
}

fn string_ref(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [s, k] = arguments("string-ref", args)?;
    let text = string("string-ref", &s)?.borrow();
    let k = in_range("string-ref", &k, text.chars().count())?;
    match text.chars().nth(k) {
        Some(c) => value(Value::Character(c)),
        None => value(Value::Unspecified),
    }
}

fn string_set(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [s, k, c] = arguments("string-set!", args)?;
    let c = character("string-set!", &c)?;
    let mut text = string("string-set!", &s)?.borrow_mut();
    let k = in_range("string-set!", &k, text.chars().count())?;
    let replaced = text
        .chars()
        .enumerate()
        .map(|(i, old)| if i == k { c } else { old })
        .collect();
    *text = replaced;
    value(Value::Unspecified)
}

// the characters of `s` in `[start, end)`
fn slice(operation: &'static str, s: &Value, start: Option<&Value>, end: Option<&Value>) -> Result<String, RuntimeError> {
    let text = string(operation, s)?.borrow();
    let (start, end) = span(operation, start, end, text.chars().count())?;
    Ok(text.chars().skip(start).take(end - start).collect())
}

fn substring(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [s, start, end] = arguments("substring", args)?;
    value(Value::string(&slice("substring", &s, Some(&start), Some(&end))?))
}

fn string_append(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let mut text = String::new();
    for arg in &args {
        text.push_str(&string("string-append", arg)?.borrow());
    }
    value(Value::string(&text))
}

fn string_copy(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [s, range @ ..] = args.as_slice() else {
        return value(Value::string(""));
    };
    value(Value::string(&slice("string-copy", s, range.first(), range.get(1))?))
}

fn string_to_list(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [s, range @ ..] = args.as_slice() else {
        return value(Value::Nil);
    };
    let text = slice("string->list", s, range.first(), range.get(1))?;
    value(Value::list(text.chars().map(Value::Character)))
}

fn list_to_string(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [chars] = arguments("list->string", args)?;
    let text = list("list->string", &chars)?
        .iter()
        .map(|c| character("list->string", c))
        .collect::<Result<String, _>>()?;
    value(Value::string(&text))
}

fn compare_strings(operation: &'static str, args: &[Value], accept: fn(&str, &str) -> bool) -> Output {
    let texts = args
        .iter()
        .map(|arg| Ok(string(operation, arg)?.borrow().clone()))
        .collect::<Result<Vec<_>, RuntimeError>>()?;
    value(texts.windows(2).all(|pair| match pair {
        [a, b] => accept(a, b),
        _ => true,
    }))
}

fn string_eq(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    compare_strings("string=?", &args, |a, b| a == b)
}

fn string_less(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    compare_strings("string<?", &args, |a, b| a < b)
}

fn string_greater(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    compare_strings("string>?", &args, |a, b| a > b)
}

fn map_string(operation: &'static str, args: Vec<Value>, map: fn(&str) -> String) -> Output {
    let [s] = arguments(operation, args)?;
    let mapped = map(&string(operation, &s)?.borrow());
    value(Value::string(&mapped))
}

fn string_upcase(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    map_string("string-upcase", args, str::to_uppercase)
}

fn string_downcase(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    map_string("string-downcase", args, str::to_lowercase)
}

fn string_foldcase(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    map_string("string-foldcase", args, |text| CaseMapper::new().fold_string(text))
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use crate::{
        compiler::environment::Environment,
        runtime::{CallbackReturn, Context, RuntimeError},
        world::value::{OutputPort, Value},
    };

    fn call(func: fn(&mut Context<'_>, Vec<Value>) -> super::Output, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let global = Environment::new();
        let (mut output, _) = OutputPort::buffer();
        let mut context = Context {
            global: &global,
            output: &mut output,
        };
        match func(&mut context, args)? {
            CallbackReturn::Value(value) => Ok(value),
            _ => Ok(Value::Unspecified),
        }
    }

    #[test]
    fn strings_index_by_character() {
        let text = Value::string("naïve");
        let_assert!(Ok(len) = call(super::string_length, vec![text.clone()]));
        check!(len.to_string() == "5");
        let_assert!(Ok(c) = call(super::string_ref, vec![text.clone(), Value::number(2)]));
        check!(c.display().to_string() == "ï");
        let_assert!(Ok(_) = call(super::string_set, vec![text.clone(), Value::number(0), Value::Character('N')]));
        check!(text.display().to_string() == "Naïve");
        let_assert!(Ok(sub) = call(super::substring, vec![text, Value::number(1), Value::number(3)]));
        check!(sub.display().to_string() == "aï");
    }

    #[test]
    fn case_mapping() {
        let_assert!(Ok(folded) = call(super::string_foldcase, vec![Value::string("Straße")]));
        check!(folded.display().to_string() == "strasse");
        let_assert!(Ok(upper) = call(super::char_upcase, vec![Value::Character('a')]));
        check!(upper.write().to_string() == r"#\A");
    }

    #[test]
    fn symbols_round_trip() {
        let_assert!(Ok(symbol) = call(super::string_to_symbol, vec![Value::string("hello world")]));
        check!(symbol.write().to_string() == "|hello world|");
        let_assert!(Ok(name) = call(super::symbol_to_string, vec![symbol]));
        check!(name.write().to_string() == "\"hello world\"");
    }
}
