//! The builtin procedures of the base library.
//!
//! Each submodule holds a declarative table of [`Builtin`] entries. The machine
//! checks arity before calling an entry, so the implementations only check
//! argument types.
use std::{cell::RefCell, rc::Rc};

use crate::{
    num::Number,
    world::{symbol::Symbol, value::Value},
};

use super::{Arity, Builtin, BuiltinFn, CallbackReturn, RuntimeError};

mod control;
mod data;
mod numbers;
mod text;

/// Every builtin procedure, in registration order
pub fn builtins() -> impl Iterator<Item = &'static Builtin> {
    [numbers::BUILTINS, data::BUILTINS, text::BUILTINS, control::BUILTINS]
        .into_iter()
        .flatten()
}

/// Library procedures written directly in bytecode
pub fn assembled() -> Vec<(&'static str, Value)> {
    control::assembled()
}

const fn builtin(name: &'static str, arity: Arity, func: BuiltinFn) -> Builtin {
    Builtin {
        name,
        arity,
        func,
        aliases: &[],
    }
}

type Output = Result<CallbackReturn, RuntimeError>;

fn value(value: impl Into<Value>) -> Output {
    Ok(CallbackReturn::Value(value.into()))
}

fn unspecified() -> Output {
    Ok(CallbackReturn::Value(Value::Unspecified))
}

/// Moves exactly `N` arguments out of `args`.
fn arguments<const N: usize>(operation: &'static str, args: Vec<Value>) -> Result<[Value; N], RuntimeError> {
    args.try_into().map_err(|args: Vec<Value>| RuntimeError::Arity {
        procedure: operation.to_owned(),
        expected: Arity::Exact(N),
        found: args.len(),
    })
}

fn number<'v>(operation: &'static str, value: &'v Value) -> Result<&'v Number, RuntimeError> {
    value
        .as_number()
        .ok_or_else(|| RuntimeError::wrong_type(operation, "a number", value))
}

fn index(operation: &'static str, value: &Value) -> Result<usize, RuntimeError> {
    value
        .as_number()
        .and_then(Number::as_index)
        .ok_or_else(|| RuntimeError::wrong_type(operation, "a non-negative exact integer", value))
}

fn string<'v>(operation: &'static str, value: &'v Value) -> Result<&'v Rc<RefCell<String>>, RuntimeError> {
    match value {
        Value::String(text) => Ok(text),
        _ => Err(RuntimeError::wrong_type(operation, "a string", value)),
    }
}

fn character(operation: &'static str, value: &Value) -> Result<char, RuntimeError> {
    match value {
        Value::Character(c) => Ok(*c),
        _ => Err(RuntimeError::wrong_type(operation, "a character", value)),
    }
}

fn symbol(operation: &'static str, value: &Value) -> Result<Symbol, RuntimeError> {
    value
        .as_symbol()
        .ok_or_else(|| RuntimeError::wrong_type(operation, "a symbol", value))
}

fn list(operation: &'static str, value: &Value) -> Result<Vec<Value>, RuntimeError> {
    value
        .proper_list()
        .ok_or_else(|| RuntimeError::wrong_type(operation, "a proper list", value))
}

fn vector<'v>(operation: &'static str, value: &'v Value) -> Result<&'v Rc<RefCell<Vec<Value>>>, RuntimeError> {
    match value {
        Value::Vector(items) => Ok(items),
        _ => Err(RuntimeError::wrong_type(operation, "a vector", value)),
    }
}

/// Checks `index < len` for the `-ref`/`-set!` procedures.
fn in_range(operation: &'static str, at: &Value, len: usize) -> Result<usize, RuntimeError> {
    let k = index(operation, at)?;
    if k < len {
        Ok(k)
    } else {
        Err(RuntimeError::Type {
            operation,
            expected: "an index in range",
            found: at.write().to_string(),
        })
    }
}

/// `[start, end)` from optional arguments, defaulting to the whole of `len`.
fn span(operation: &'static str, start: Option<&Value>, end: Option<&Value>, len: usize) -> Result<(usize, usize), RuntimeError> {
    let start = start.map(|v| index(operation, v)).transpose()?.unwrap_or(0);
    let end = end.map(|v| index(operation, v)).transpose()?.unwrap_or(len);
    if start <= end && end <= len {
        Ok((start, end))
    } else {
        Err(RuntimeError::Type {
            operation,
            expected: "a range within bounds",
            found: format!("{start} to {end} of {len}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use assert2::check;

    use super::builtins;

    #[test]
    fn names_are_unique() {
        let mut seen = HashSet::new();
        for builtin in builtins() {
            for name in std::iter::once(&builtin.name).chain(builtin.aliases) {
                check!(seen.insert(*name), "duplicate builtin {name}");
            }
        }
        check!(seen.contains("call/cc"));
        check!(seen.contains("call-with-current-continuation"));
    }
}
