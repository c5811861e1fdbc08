//! runtimes are responsible for executing compiled blocks against an environment

use core::fmt;
use std::rc::Rc;

use crate::{
    compiler::{bytecode::Template, environment::Environment},
    expander::ExpandError,
    num::NumberError,
    world::value::{OutputPort, Value},
};

use self::continuation::Continuation;

pub mod continuation;
pub mod external;
pub mod interpreter;
pub mod machine;
pub mod scheme_base;

/// Errors raised while a block executes. They abort the block.
///
/// Offending values are carried in their printed form.
#[derive(thiserror::Error, Debug)]
pub enum RuntimeError {
    #[error("{operation}: expected {expected}, found {found}")]
    Type {
        operation: &'static str,
        expected: &'static str,
        found: String,
    },
    #[error("unbound variable: {0}")]
    UnboundVariable(String),
    #[error("{procedure}: expected {expected} arguments, got {found}")]
    Arity {
        procedure: String,
        expected: Arity,
        found: usize,
    },
    #[error("not applicable: {0}")]
    NotApplicable(String),
    #[error("{0}: division by exact zero")]
    DivisionByZero(&'static str),
    #[error("stack underflow")]
    StackUnderflow,
    #[error("invalid opcode: {0}")]
    InvalidOpcode(String),
    #[error("{message}{irritants}")]
    User { message: String, irritants: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Expand(#[from] ExpandError),
}

impl RuntimeError {
    pub(crate) fn wrong_type(operation: &'static str, expected: &'static str, found: &Value) -> Self {
        Self::Type {
            operation,
            expected,
            found: found.write().to_string(),
        }
    }
}

impl From<NumberError> for RuntimeError {
    fn from(value: NumberError) -> Self {
        match value {
            NumberError::NotReal { operation, found } => Self::Type {
                operation,
                expected: "a real number",
                found: found.to_string(),
            },
            NumberError::Domain {
                operation,
                expected,
                found,
            } => Self::Type {
                operation,
                expected,
                found: found.to_string(),
            },
            NumberError::DivisionByZero(operation) => Self::DivisionByZero(operation),
        }
    }
}

// It is up to runtimes to implement procedures
#[derive(Clone)]
pub enum Procedure {
    Closure(Rc<Closure>),
    Builtin(&'static Builtin),
    Continuation(Rc<Continuation>),
}

impl Procedure {
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Closure(a), Self::Closure(b)) => Rc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => std::ptr::eq(*a, *b),
            (Self::Continuation(a), Self::Continuation(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn name(&self) -> Option<String> {
        match self {
            Self::Closure(closure) => closure.template.name.map(|name| name.to_string()),
            Self::Builtin(builtin) => Some(builtin.name.to_owned()),
            Self::Continuation(_) => None,
        }
    }

    // report the arity of a procedure
    pub fn arity(&self) -> Arity {
        match self {
            Self::Closure(closure) => closure.template.arity(),
            Self::Builtin(builtin) => builtin.arity,
            Self::Continuation(_) => Arity::Min(0),
        }
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continuation(_) => f.write_str("#<continuation>"),
            _ => match self.name() {
                Some(name) => write!(f, "#<procedure {name}>"),
                None => f.write_str("#<procedure>"),
            },
        }
    }
}

/// A template bound to the environment it was captured in
pub struct Closure {
    pub template: Rc<Template>,
    pub env: Environment,
}

/// Procedure arity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Min(usize),
    Between(usize, usize),
}

impl Arity {
    pub fn is_satisfied(&self, len: usize) -> bool {
        match self {
            Self::Exact(e) => *e == len,
            Self::Min(m) => *m <= len,
            Self::Between(lo, hi) => (*lo..=*hi).contains(&len),
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(e) => write!(f, "{e}"),
            Self::Min(m) => write!(f, "at least {m}"),
            Self::Between(lo, hi) => write!(f, "{lo} to {hi}"),
        }
    }
}

// Native code cannot make calls, it can only hand a callable back to the machine.
// Callbacks are essentially CPS procedures.
pub enum CallbackReturn {
    Value(Value),
    /// Return several values to the continuation
    Values(Vec<Value>),
    /// Tail-call a procedure in place of this one
    Apply {
        procedure: Value,
        arguments: Vec<Value>,
    },
    /// Call the procedure with the current continuation as its argument
    CallCc(Value),
}

/// What a builtin can see of the running machine
pub struct Context<'m> {
    pub global: &'m Environment,
    pub output: &'m mut OutputPort,
}

pub type BuiltinFn = fn(&mut Context<'_>, Vec<Value>) -> Result<CallbackReturn, RuntimeError>;

/// A library entry: a procedure implemented in Rust
pub struct Builtin {
    pub name: &'static str,
    pub arity: Arity,
    pub func: BuiltinFn,
    pub aliases: &'static [&'static str],
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<procedure {}>", self.name)
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::{Arity, RuntimeError};
    use crate::num::{Number, NumberError};

    #[test]
    fn arity_checks() {
        check!(Arity::Exact(2).is_satisfied(2));
        check!(!Arity::Exact(2).is_satisfied(3));
        check!(Arity::Min(1).is_satisfied(5));
        check!(!Arity::Min(1).is_satisfied(0));
        check!(Arity::Between(1, 2).is_satisfied(2));
        check!(!Arity::Between(1, 2).is_satisfied(3));
        check!(Arity::Between(1, 2).to_string() == "1 to 2");
        check!(Arity::Min(1).to_string() == "at least 1");
    }

    #[test]
    fn number_errors_become_type_errors() {
        let error = RuntimeError::from(NumberError::NotReal {
            operation: "<",
            found: Number::rectangular(Number::integer(1).real_part().clone(), Number::integer(2).real_part().clone()),
        });
        check!(error.to_string() == "<: expected a real number, found 1+2i");
        let error = RuntimeError::from(NumberError::DivisionByZero("/"));
        check!(error.to_string() == "/: division by exact zero");
    }
}
