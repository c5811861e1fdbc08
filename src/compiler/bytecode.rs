//! Instructions the machine executes, and the blocks and templates holding them.
use core::fmt;
use std::rc::Rc;

use crate::{
    runtime::{continuation::GuardList, Arity},
    world::{symbol::Symbol, value::Value},
};

/// One machine instruction. Jump offsets are relative to the following instruction.
#[derive(Debug, Clone)]
pub enum Instruction {
    Push(Value),
    Pop,
    Dup,
    Jmp(usize),
    /// Pops the test value and jumps when it is `#f`
    JmpF(usize),
    /// Reserves a variable in the current frame
    Res(Symbol),
    /// Pops a value into the nearest binding
    Set(Symbol),
    Load(Symbol),
    /// Pushes a fresh frame whose parent is the current environment
    Enter,
    Leave,
    /// Pops a template and pushes a closure over the current environment
    Cap,
    Apply(usize),
    ApplyT(usize),
    Ret,
    /// Pops a consumer and a value (or bundle of values) and tail-applies the one to the other
    ApplyV,
    /// Pops an environment specifier and a datum, and evaluates the datum there
    Eval,
    /// Pops `after` and `before` and pushes a guard onto the guard list
    Wind,
    Unwind,
    /// Installs a guard list outright
    Rewind(GuardList),
}

impl Instruction {
    fn name(&self) -> &'static str {
        match self {
            Self::Push(_) => "PUSH",
            Self::Pop => "POP",
            Self::Dup => "DUP",
            Self::Jmp(_) => "JMP",
            Self::JmpF(_) => "JMPF",
            Self::Res(_) => "RES",
            Self::Set(_) => "SET",
            Self::Load(_) => "LOAD",
            Self::Enter => "ENTER",
            Self::Leave => "LEAVE",
            Self::Cap => "CAP",
            Self::Apply(_) => "APPLY",
            Self::ApplyT(_) => "APPLYT",
            Self::Ret => "RET",
            Self::ApplyV => "APPLYV",
            Self::Eval => "EVAL",
            Self::Wind => "WIND",
            Self::Unwind => "UNWIND",
            Self::Rewind(_) => "REWIND",
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        match self {
            Self::Push(Value::Template(template)) => write!(f, "{name:<8} {template}"),
            Self::Push(value) => write!(f, "{name:<8} {value}"),
            Self::Jmp(offset) | Self::JmpF(offset) => write!(f, "{name:<8} +{offset}"),
            Self::Res(symbol) | Self::Set(symbol) | Self::Load(symbol) => {
                write!(f, "{name:<8} {symbol:?}")
            }
            Self::Apply(count) | Self::ApplyT(count) => write!(f, "{name:<8} {count}"),
            Self::Rewind(guards) => write!(f, "{name:<8} ({} guards)", guards.len()),
            _ => f.write_str(name),
        }
    }
}

/// A straight-line sequence of instructions
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub code: Vec<Instruction>,
}

impl Block {
    pub fn new(code: Vec<Instruction>) -> Self {
        Self { code }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn get(&self, pc: usize) -> Option<&Instruction> {
        self.code.get(pc)
    }

    fn templates(&self) -> impl Iterator<Item = &Rc<Template>> {
        self.code.iter().filter_map(|instruction| match instruction {
            Instruction::Push(Value::Template(template)) => Some(template),
            _ => None,
        })
    }
}

/// Disassembly: the block itself, then every template it pushes.
impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pc, instruction) in self.code.iter().enumerate() {
            writeln!(f, "{pc:04}  {instruction}")?;
        }
        for template in self.templates() {
            writeln!(f, "== {template} ==")?;
            write!(f, "{}", template.block)?;
        }
        Ok(())
    }
}

/// A compiled procedure body, waiting to capture an environment.
#[derive(Debug)]
pub struct Template {
    pub name: Option<Symbol>,
    pub params: Vec<Symbol>,
    pub rest: Option<Symbol>,
    pub block: Rc<Block>,
}

impl Template {
    pub fn arity(&self) -> Arity {
        if self.rest.is_some() {
            Arity::Min(self.params.len())
        } else {
            Arity::Exact(self.params.len())
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name {
            Some(name) => write!(f, "#<template {name}, arity {}>", self.arity()),
            None => write!(f, "#<template arity {}>", self.arity()),
        }
    }
}
