//! The closed set of primitive forms the expander produces and the compiler consumes.
use std::{cell::OnceCell, rc::Rc};

use crate::{
    compiler::bytecode::Template,
    world::{symbol::Symbol, value::Value},
};

/// A fully expanded expression. No syntactic keywords remain.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Self-evaluating data, and values the expander embeds directly
    Literal(Value),
    Quote(Value),
    Reference(Symbol),
    Call {
        operator: Box<Expr>,
        operands: Vec<Expr>,
    },
    Lambda(Rc<Lambda>),
    If {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Option<Box<Expr>>,
    },
    Define {
        name: Symbol,
        value: Box<Expr>,
    },
    Assign {
        name: Symbol,
        value: Box<Expr>,
    },
}

/// The source of a procedure. Its template is compiled the first time it is
/// needed and shared by every closure made from it.
#[derive(Debug)]
pub struct Lambda {
    pub name: Option<Symbol>,
    pub params: Vec<Symbol>,
    pub rest: Option<Symbol>,
    pub body: Vec<Expr>,
    pub(crate) template: OnceCell<Rc<Template>>,
}

impl Lambda {
    pub fn new(name: Option<Symbol>, params: Vec<Symbol>, rest: Option<Symbol>, body: Vec<Expr>) -> Self {
        Self {
            name,
            params,
            rest,
            body,
            template: OnceCell::new(),
        }
    }
}

impl Expr {
    pub fn call(operator: Expr, operands: Vec<Expr>) -> Self {
        Self::Call {
            operator: Box::new(operator),
            operands,
        }
    }

    pub fn lambda(params: Vec<Symbol>, rest: Option<Symbol>, body: Vec<Expr>) -> Self {
        Self::Lambda(Rc::new(Lambda::new(None, params, rest, body)))
    }

    /// Gives an anonymous lambda the name it is being defined under.
    pub(crate) fn named(self, name: Symbol) -> Self {
        match self {
            Self::Lambda(lambda) if lambda.name.is_none() => match Rc::try_unwrap(lambda) {
                Ok(lambda) => Self::Lambda(Rc::new(Lambda::new(
                    Some(name),
                    lambda.params,
                    lambda.rest,
                    lambda.body,
                ))),
                Err(shared) => Self::Lambda(shared),
            },
            other => other,
        }
    }
}
