pub mod ast;
pub mod compiler;
pub mod expander;
pub mod lexer;
pub mod num;
pub mod reader;
pub mod runtime;
pub mod world;

pub use compiler::{bytecode::Block, environment::Environment, CompileError};
pub use expander::ExpandError;
pub use num::Number;
pub use reader::{parse, SyntaxError};
pub use runtime::{
    external::{Displayed, Written},
    interpreter::Interpreter,
    machine::Machine,
    Arity, Procedure, RuntimeError,
};
pub use world::{fuel::Fuel, symbol::Symbol, value};

/// Anything that can stop a program, by the stage that stopped it
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Expand(ExpandError),
    #[error(transparent)]
    Compile(CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl From<ExpandError> for Error {
    fn from(value: ExpandError) -> Self {
        match value {
            ExpandError::Compile(error) => Self::Compile(error),
            other => Self::Expand(other),
        }
    }
}

impl From<CompileError> for Error {
    fn from(value: CompileError) -> Self {
        Self::Compile(value)
    }
}
