//! Compile expanded Scheme code into bytecode to execute!
//!
//! Every primitive form compiles to a linear run of instructions, given whether
//! it sits in tail position. Variables are looked up by name at run time, along
//! the chain of frames, so no slot resolution happens here. Local names were
//! made unique by the expander.
//!
//! For example:
//!
//! (define (twice x) (+ x x))
//!
//! compiles to
//!
//! 0000  RES      twice
//! 0001  PUSH     #<template twice, arity 1>
//! 0002  CAP
//! 0003  SET      twice
//! 0004  PUSH     twice
//! == #<template twice, arity 1> ==
//! 0000  ENTER
//! 0001  RES      x.1
//! 0002  SET      x.1
//! 0003  LOAD     x.1
//! 0004  LOAD     x.1
//! 0005  LOAD     +
//! 0006  LEAVE
//! 0007  APPLYT   2
//! 0008  RET
use std::rc::Rc;

use crate::{
    ast::{Expr, Lambda},
    world::value::Value,
};

use self::bytecode::{Block, Instruction, Template};

pub mod bytecode;
pub mod environment;

#[derive(thiserror::Error, Debug, Clone)]
pub enum CompileError {
    #[error("improper list in procedure call: {0}")]
    ImproperCall(String),
    #[error("empty combination () cannot be evaluated")]
    EmptyCombination,
}

/// Compiles one top-level form into its own block.
pub fn compile(expr: &Expr) -> Block {
    let mut code = vec![];
    emit(expr, false, &mut code);
    tracing::trace!(instructions = code.len(), "compiled top-level form");
    Block::new(code)
}

/// Compiles forms evaluated by `eval`: run in sequence, the last one's value
/// returned to the caller.
pub fn compile_eval(exprs: &[Expr]) -> Block {
    let mut code = vec![];
    emit_sequence(exprs, false, &mut code);
    code.push(Instruction::Ret);
    Block::new(code)
}

/// The shared template of a lambda, compiled on first use.
pub fn template(lambda: &Lambda) -> Rc<Template> {
    lambda
        .template
        .get_or_init(|| {
            let mut code = vec![Instruction::Enter];
            for name in lambda.rest.iter().chain(lambda.params.iter().rev()) {
                code.push(Instruction::Res(*name));
                code.push(Instruction::Set(*name));
            }
            emit_sequence(&lambda.body, true, &mut code);
            code.push(Instruction::Ret);
            Rc::new(Template {
                name: lambda.name,
                params: lambda.params.clone(),
                rest: lambda.rest,
                block: Rc::new(Block::new(code)),
            })
        })
        .clone()
}

fn emit_sequence(exprs: &[Expr], tail: bool, code: &mut Vec<Instruction>) {
    let Some((last, init)) = exprs.split_last() else {
        code.push(Instruction::Push(Value::Unspecified));
        return;
    };
    for expr in init {
        emit(expr, false, code);
        code.push(Instruction::Pop);
    }
    emit(last, tail, code);
}

fn emit(expr: &Expr, tail: bool, code: &mut Vec<Instruction>) {
    match expr {
        Expr::Literal(value) | Expr::Quote(value) => code.push(Instruction::Push(value.clone())),
        Expr::Reference(name) => code.push(Instruction::Load(*name)),
        Expr::Define { name, value } => {
            code.push(Instruction::Res(*name));
            emit(value, false, code);
            code.push(Instruction::Set(*name));
            code.push(Instruction::Push(Value::Symbol(*name)));
        }
        Expr::Assign { name, value } => {
            emit(value, false, code);
            code.push(Instruction::Set(*name));
            code.push(Instruction::Push(Value::Unspecified));
        }
        Expr::If {
            test,
            consequent,
            alternate,
        } => {
            emit(test, false, code);
            let mut then_code = vec![];
            emit(consequent, tail, &mut then_code);
            let mut else_code = vec![];
            match alternate {
                Some(alternate) => emit(alternate, tail, &mut else_code),
                None => else_code.push(Instruction::Push(Value::Unspecified)),
            }
            // the consequent ends by jumping over the alternate
            code.push(Instruction::JmpF(then_code.len() + 1));
            code.extend(then_code);
            code.push(Instruction::Jmp(else_code.len()));
            code.extend(else_code);
        }
        Expr::Lambda(lambda) => {
            code.push(Instruction::Push(Value::Template(template(lambda))));
            code.push(Instruction::Cap);
        }
        Expr::Call { operator, operands } => {
            for operand in operands {
                emit(operand, false, code);
            }
            emit(operator, false, code);
            if tail {
                code.push(Instruction::Leave);
                code.push(Instruction::ApplyT(operands.len()));
            } else {
                code.push(Instruction::Apply(operands.len()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::{bytecode::Instruction, compile, template};
    use crate::{
        ast::{Expr, Lambda},
        world::{symbol::Symbol, value::Value},
    };

    fn reference(name: &str) -> Expr {
        Expr::Reference(Symbol::intern(name))
    }

    #[test]
    fn if_jumps_over_branches() {
        let expr = Expr::If {
            test: Box::new(reference("t")),
            consequent: Box::new(Expr::Literal(Value::number(1i64))),
            alternate: None,
        };
        let block = compile(&expr);
        let_assert!([Instruction::Load(_), Instruction::JmpF(2), Instruction::Push(_), Instruction::Jmp(1), Instruction::Push(Value::Unspecified)] = block.code.as_slice());
    }

    #[test]
    fn tail_calls_leave_the_frame() {
        let x = Symbol::intern("x");
        let lambda = Lambda::new(
            None,
            vec![x],
            None,
            vec![Expr::call(reference("f"), vec![reference("x")])],
        );
        let template = template(&lambda);
        let code = &template.block.code;
        let_assert!(Some(Instruction::Enter) = code.first());
        let_assert!([.., Instruction::Leave, Instruction::ApplyT(1), Instruction::Ret] = code.as_slice());

        let toplevel = compile(&Expr::call(reference("f"), vec![]));
        let_assert!([Instruction::Load(_), Instruction::Apply(0)] = toplevel.code.as_slice());
    }

    #[test]
    fn templates_are_shared() {
        let lambda = Lambda::new(None, vec![], None, vec![Expr::Literal(Value::Nil)]);
        check!(std::rc::Rc::ptr_eq(&template(&lambda), &template(&lambda)));
    }
}
