//! Continuations: the complete state of the machine as a value.
//!
//! A continuation is never changed once other code can see it. The machine
//! owns the continuation it is stepping, and anything that captures it
//! (a non-tail call, `call/cc`) gets an `Rc` snapshot instead, so a captured
//! continuation can be re-entered any number of times.
use core::fmt;
use std::rc::Rc;

use crate::{
    compiler::{bytecode::Block, environment::Environment},
    world::value::Value,
};

/// The `before` and `after` thunks of one `dynamic-wind` extent
#[derive(Debug)]
pub struct Guard {
    pub before: Value,
    pub after: Value,
}

/// Active guards, outermost first
pub type GuardList = im::Vector<Rc<Guard>>;

#[derive(Clone)]
pub struct Continuation {
    pub env: Environment,
    pub block: Rc<Block>,
    pub pc: usize,
    pub stack: im::Vector<Value>,
    pub outer: Option<Rc<Continuation>>,
    pub guards: GuardList,
}

impl Continuation {
    /// Starts `block` from its first instruction with an empty stack.
    pub fn new(env: Environment, block: Rc<Block>) -> Self {
        Self {
            env,
            block,
            pc: 0,
            stack: im::Vector::new(),
            outer: None,
            guards: GuardList::new(),
        }
    }

    /// A continuation that finishes the run with whatever value it receives
    pub fn halt(env: Environment, guards: GuardList) -> Self {
        let mut k = Self::new(env, Rc::new(Block::default()));
        k.guards = guards;
        k
    }

    pub fn depth(&self) -> usize {
        std::iter::successors(self.outer.as_deref(), |k| k.outer.as_deref()).count()
    }
}

// Deep non-tail recursion builds long outer chains; drop them without recursing.
impl Drop for Continuation {
    fn drop(&mut self) {
        let mut outer = self.outer.take();
        while let Some(k) = outer {
            match Rc::try_unwrap(k) {
                Ok(mut k) => outer = k.outer.take(),
                Err(_) => break,
            }
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("pc", &self.pc)
            .field("stack", &self.stack.len())
            .field("depth", &self.depth())
            .field("guards", &self.guards.len())
            .finish()
    }
}

/// Whether two guard lists hold the very same guards
pub fn same_guards(a: &GuardList, b: &GuardList) -> bool {
    a.len() == b.len() && common_prefix(a, b) == a.len()
}

/// Number of leading guards the two lists share
pub fn common_prefix(a: &GuardList, b: &GuardList) -> usize {
    a.iter()
        .zip(b.iter())
        .take_while(|(x, y)| Rc::ptr_eq(x, y))
        .count()
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use assert2::check;

    use super::{common_prefix, same_guards, Continuation, Guard, GuardList};
    use crate::{
        compiler::{bytecode::Block, environment::Environment},
        world::value::Value,
    };

    fn guard() -> Rc<Guard> {
        Rc::new(Guard {
            before: Value::Unspecified,
            after: Value::Unspecified,
        })
    }

    #[test]
    fn guard_lists_compare_by_identity() {
        let (a, b, c) = (guard(), guard(), guard());
        let outer: GuardList = [a.clone(), b.clone()].into_iter().collect();
        let other: GuardList = [a.clone(), c].into_iter().collect();
        check!(common_prefix(&outer, &other) == 1);
        check!(same_guards(&outer, &outer.clone()));
        check!(!same_guards(&outer, &other));
        let shorter: GuardList = [a].into_iter().collect();
        check!(!same_guards(&outer, &shorter));
        check!(common_prefix(&outer, &shorter) == 1);
    }

    #[test]
    fn long_chains_drop_iteratively() {
        let env = Environment::new();
        let block = Rc::new(Block::default());
        let mut k = Continuation::new(env.clone(), block.clone());
        for _ in 0..200_000 {
            let mut next = Continuation::new(env.clone(), block.clone());
            next.outer = Some(Rc::new(k));
            k = next;
        }
        check!(k.depth() == 200_000);
        drop(k);
    }
}
