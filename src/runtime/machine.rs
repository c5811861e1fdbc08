//! The machine steps one continuation at a time.
//!
//! Every step consumes the current [`Continuation`] and yields the next one;
//! nothing lives on the host stack between steps. Procedure calls snapshot the
//! caller as the callee's `outer` continuation, and tail calls hand over the
//! caller's own `outer` instead, so a loop in tail position runs in constant space.
use std::rc::Rc;

use crate::{
    compiler::{
        self,
        bytecode::{Block, Instruction},
        environment::Environment,
    },
    expander,
    world::{
        fuel::Fuel,
        value::{OutputPort, Value},
    },
};

use super::{
    continuation::{common_prefix, same_guards, Continuation, Guard, GuardList},
    CallbackReturn, Closure, Context, Procedure, RuntimeError,
};

/// Executes compiled blocks against a global environment
pub struct Machine {
    global: Environment,
    output: OutputPort,
    current: Option<Continuation>,
}

enum Flow {
    Next(Continuation),
    /// The outermost continuation returned with this stack
    Done(Vec<Value>),
}

fn pop(k: &mut Continuation) -> Result<Value, RuntimeError> {
    k.stack.pop_back().ok_or(RuntimeError::StackUnderflow)
}

// operator on top, its arguments below it in order
fn pop_call(k: &mut Continuation, count: usize) -> Result<(Value, Vec<Value>), RuntimeError> {
    let procedure = pop(k)?;
    let Some(at) = k.stack.len().checked_sub(count) else {
        return Err(RuntimeError::StackUnderflow);
    };
    let arguments = k.stack.split_off(at);
    Ok((procedure, arguments.into_iter().collect()))
}

impl Machine {
    pub fn new(global: Environment, output: OutputPort) -> Self {
        Self {
            global,
            output,
            current: None,
        }
    }

    pub fn global(&self) -> &Environment {
        &self.global
    }

    pub fn output(&self) -> &OutputPort {
        &self.output
    }

    pub fn set_output(&mut self, output: OutputPort) {
        self.output = output;
    }

    /// Whether a loaded block has not finished yet
    pub fn is_running(&self) -> bool {
        self.current.is_some()
    }

    /// How many continuations wait beneath the current one, if a block is loaded
    pub fn depth(&self) -> Option<usize> {
        self.current.as_ref().map(Continuation::depth)
    }

    /// Starts `block` with a fresh continuation, abandoning any unfinished one.
    pub fn load(&mut self, block: Rc<Block>) {
        self.current = Some(Continuation::new(self.global.clone(), block));
    }

    /// Runs the loaded block until it finishes or `fuel` runs out.
    ///
    /// Returns the final value stack when the block finished, or `None` when the
    /// machine stopped early; calling `run` again picks up where it stopped.
    /// An error abandons the block.
    pub fn run(&mut self, fuel: &mut Fuel) -> Result<Option<Vec<Value>>, RuntimeError> {
        while fuel.should_continue() {
            let Some(k) = self.current.take() else {
                return Ok(Some(vec![]));
            };
            fuel.consume(1);
            match self.step(k)? {
                Flow::Next(k) => self.current = Some(k),
                Flow::Done(stack) => return Ok(Some(stack)),
            }
        }
        Ok(None)
    }

    /// Runs `block` to completion and returns its final value stack.
    pub fn execute(&mut self, block: Rc<Block>) -> Result<Vec<Value>, RuntimeError> {
        self.load(block);
        let mut fuel = Fuel::unlimited();
        loop {
            if let Some(stack) = self.run(&mut fuel)? {
                return Ok(stack);
            }
            fuel.refill(i64::MAX, i64::MAX);
        }
    }

    fn step(&mut self, mut k: Continuation) -> Result<Flow, RuntimeError> {
        let Some(instruction) = k.block.get(k.pc).cloned() else {
            return self.finish(k);
        };
        k.pc += 1;
        match instruction {
            Instruction::Push(value) => k.stack.push_back(value),
            Instruction::Pop => {
                pop(&mut k)?;
            }
            Instruction::Dup => {
                let top = k.stack.back().cloned().ok_or(RuntimeError::StackUnderflow)?;
                k.stack.push_back(top);
            }
            Instruction::Jmp(offset) => k.pc += offset,
            Instruction::JmpF(offset) => {
                if !pop(&mut k)?.is_true() {
                    k.pc += offset;
                }
            }
            Instruction::Res(name) => k.env.reserve(name),
            Instruction::Set(name) => {
                let value = pop(&mut k)?;
                if !k.env.set(name, value) {
                    return Err(RuntimeError::UnboundVariable(name.to_string()));
                }
            }
            Instruction::Load(name) => match k.env.get(name) {
                Some(Value::Undefined) | None => {
                    return Err(RuntimeError::UnboundVariable(name.to_string()))
                }
                Some(value) => k.stack.push_back(value),
            },
            Instruction::Enter => k.env = k.env.child(),
            Instruction::Leave => {
                let Some(parent) = k.env.parent().cloned() else {
                    return Err(RuntimeError::InvalidOpcode("LEAVE in the root frame".into()));
                };
                k.env = parent;
            }
            Instruction::Cap => match pop(&mut k)? {
                Value::Template(template) => {
                    let closure = Closure {
                        template,
                        env: k.env.clone(),
                    };
                    k.stack
                        .push_back(Value::Procedure(Procedure::Closure(Rc::new(closure))));
                }
                other => return Err(RuntimeError::wrong_type("CAP", "a procedure template", &other)),
            },
            Instruction::Apply(count) => {
                let (procedure, arguments) = pop_call(&mut k, count)?;
                return self.apply(k, procedure, arguments, false);
            }
            Instruction::ApplyT(count) => {
                let (procedure, arguments) = pop_call(&mut k, count)?;
                return self.apply(k, procedure, arguments, true);
            }
            Instruction::Ret => return self.finish(k),
            Instruction::ApplyV => {
                let consumer = pop(&mut k)?;
                let arguments = match pop(&mut k)? {
                    Value::Values(values) => values.to_vec(),
                    value => vec![value],
                };
                return self.apply(k, consumer, arguments, true);
            }
            Instruction::Eval => return self.eval(k),
            Instruction::Wind => {
                let after = pop(&mut k)?;
                let before = pop(&mut k)?;
                k.guards.push_back(Rc::new(Guard { before, after }));
            }
            Instruction::Unwind => {
                if k.guards.pop_back().is_none() {
                    return Err(RuntimeError::InvalidOpcode("UNWIND with no active guard".into()));
                }
            }
            Instruction::Rewind(guards) => k.guards = guards,
        }
        Ok(Flow::Next(k))
    }

    fn apply(
        &mut self,
        mut k: Continuation,
        procedure: Value,
        mut arguments: Vec<Value>,
        tail: bool,
    ) -> Result<Flow, RuntimeError> {
        let Value::Procedure(procedure) = procedure else {
            return Err(RuntimeError::NotApplicable(procedure.write().to_string()));
        };
        let arity = procedure.arity();
        if !arity.is_satisfied(arguments.len()) {
            return Err(RuntimeError::Arity {
                procedure: format!("{procedure:?}"),
                expected: arity,
                found: arguments.len(),
            });
        }

        match procedure {
            Procedure::Closure(closure) => {
                let template = &closure.template;
                let rest = template
                    .rest
                    .map(|_| Value::list(arguments.split_off(template.params.len())));
                let mut stack: im::Vector<Value> = arguments.into_iter().collect();
                stack.extend(rest);
                let guards = k.guards.clone();
                let outer = if tail { k.outer.take() } else { Some(Rc::new(k)) };
                Ok(Flow::Next(Continuation {
                    env: closure.env.clone(),
                    block: template.block.clone(),
                    pc: 0,
                    stack,
                    outer,
                    guards,
                }))
            }
            Procedure::Builtin(builtin) => {
                let mut context = Context {
                    global: &self.global,
                    output: &mut self.output,
                };
                match (builtin.func)(&mut context, arguments)? {
                    CallbackReturn::Value(value) => self.deliver(k, value, tail),
                    CallbackReturn::Values(values) => self.deliver(k, Value::values(values), tail),
                    CallbackReturn::Apply {
                        procedure,
                        arguments,
                    } => self.apply(k, procedure, arguments, tail),
                    CallbackReturn::CallCc(receiver) => {
                        let captured = if tail {
                            match &k.outer {
                                Some(outer) => outer.clone(),
                                None => Rc::new(Continuation::halt(k.env.clone(), k.guards.clone())),
                            }
                        } else {
                            Rc::new(k.clone())
                        };
                        tracing::trace!(depth = captured.depth(), "captured continuation");
                        let captured = Value::Procedure(Procedure::Continuation(captured));
                        self.apply(k, receiver, vec![captured], tail)
                    }
                }
            }
            Procedure::Continuation(target) => {
                tracing::trace!(depth = target.depth(), "re-entering continuation");
                let from = std::mem::take(&mut k.guards);
                self.resume(from, k.env.clone(), target, Value::values(arguments))
            }
        }
    }

    // hands a builtin's result to whoever receives the value of the call
    fn deliver(&mut self, mut k: Continuation, value: Value, tail: bool) -> Result<Flow, RuntimeError> {
        if !tail {
            k.stack.push_back(value);
            return Ok(Flow::Next(k));
        }
        match k.outer.take() {
            Some(outer) => {
                let from = std::mem::take(&mut k.guards);
                self.resume(from, k.env.clone(), outer, value)
            }
            None => Ok(Flow::Done(vec![value])),
        }
    }

    // the block ran out or hit RET: return the top of the stack
    fn finish(&mut self, mut k: Continuation) -> Result<Flow, RuntimeError> {
        match k.outer.take() {
            Some(outer) => {
                let value = k.stack.back().cloned().unwrap_or(Value::Unspecified);
                let from = std::mem::take(&mut k.guards);
                self.resume(from, k.env.clone(), outer, value)
            }
            None => Ok(Flow::Done(std::mem::take(&mut k.stack).into_iter().collect())),
        }
    }

    /// Passes `value` to `target` as control leaves the guards `from`.
    ///
    /// When the guard lists differ, control first goes through a synthesized
    /// block that runs the `after` thunks of every exited extent (innermost
    /// first), then the `before` thunks of every entered one (outermost first),
    /// each with the guard list of the extent it runs in.
    fn resume(
        &mut self,
        from: GuardList,
        env: Environment,
        target: Rc<Continuation>,
        value: Value,
    ) -> Result<Flow, RuntimeError> {
        if same_guards(&from, &target.guards) {
            let mut next = Rc::unwrap_or_clone(target);
            next.stack.push_back(value);
            return Ok(Flow::Next(next));
        }

        let shared = common_prefix(&from, &target.guards);
        let mut code = vec![];
        for depth in (shared..from.len()).rev() {
            code.push(Instruction::Rewind(from.take(depth)));
            code.push(Instruction::Push(from[depth].after.clone()));
            code.push(Instruction::Apply(0));
            code.push(Instruction::Pop);
        }
        for depth in shared..target.guards.len() {
            code.push(Instruction::Rewind(target.guards.take(depth)));
            code.push(Instruction::Push(target.guards[depth].before.clone()));
            code.push(Instruction::Apply(0));
            code.push(Instruction::Pop);
        }
        tracing::debug!(
            exits = from.len() - shared,
            entries = target.guards.len() - shared,
            "dynamic-wind transition"
        );
        code.push(Instruction::Rewind(target.guards.clone()));
        code.push(Instruction::Push(value));
        code.push(Instruction::Push(Value::Procedure(Procedure::Continuation(target))));
        code.push(Instruction::ApplyT(1));

        let mut transition = Continuation::new(env, Rc::new(Block::new(code)));
        transition.guards = from;
        Ok(Flow::Next(transition))
    }

    // pops the environment specifier, then the datum
    fn eval(&mut self, mut k: Continuation) -> Result<Flow, RuntimeError> {
        let specifier = pop(&mut k)?;
        let datum = pop(&mut k)?;
        let env = match &specifier {
            Value::Nil => self.global.clone(),
            Value::Environment(env) => env.clone(),
            _ => match specifier.car() {
                Some(Value::Environment(env)) => env,
                _ => return Err(RuntimeError::wrong_type("eval", "an environment", &specifier)),
            },
        };
        let exprs = expander::expand_toplevel(&datum, &env)?;
        let block = compiler::compile_eval(&exprs);
        let guards = k.guards.clone();
        Ok(Flow::Next(Continuation {
            env,
            block: Rc::new(block),
            pc: 0,
            stack: im::Vector::new(),
            outer: Some(Rc::new(k)),
            guards,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use assert2::{check, let_assert};

    use super::Machine;
    use crate::{
        compiler::{
            bytecode::{Block, Instruction},
            environment::Environment,
        },
        runtime::RuntimeError,
        world::{self, fuel::Fuel, symbol::Symbol, value::{OutputPort, Value}},
    };

    fn machine() -> Machine {
        let_assert!(Ok(()) = world::initialize());
        Machine::new(Environment::new(), OutputPort::buffer().0)
    }

    fn sum_block() -> Rc<Block> {
        Rc::new(Block::new(vec![
            Instruction::Push(Value::number(1)),
            Instruction::Push(Value::number(2)),
            Instruction::Load(Symbol::intern("+")),
            Instruction::Apply(2),
        ]))
    }

    #[test]
    fn applies_builtins() {
        let mut machine = machine();
        let_assert!(Ok(stack) = machine.execute(sum_block()));
        check!(stack.len() == 1);
        check!(stack[0].to_string() == "3");
    }

    #[test]
    fn resumes_after_running_out_of_fuel() {
        let mut machine = machine();
        machine.load(sum_block());
        let mut fuel = Fuel::with(2);
        let_assert!(Ok(None) = machine.run(&mut fuel));
        check!(machine.is_running());
        fuel.refill(100, 100);
        let_assert!(Ok(Some(stack)) = machine.run(&mut fuel));
        check!(stack[0].to_string() == "3");
        check!(!machine.is_running());
    }

    #[test]
    fn jumps_skip_forward() {
        let mut machine = machine();
        let block = Block::new(vec![
            Instruction::Push(Value::Boolean(false)),
            Instruction::JmpF(2),
            Instruction::Push(Value::symbol("then")),
            Instruction::Jmp(1),
            Instruction::Push(Value::symbol("else")),
        ]);
        let_assert!(Ok(stack) = machine.execute(Rc::new(block)));
        check!(stack[0].to_string() == "else");
    }

    #[test]
    fn fatal_errors() {
        let mut machine = machine();
        let unbound = Block::new(vec![Instruction::Load(Symbol::intern("no-such-thing"))]);
        let_assert!(Err(RuntimeError::UnboundVariable(name)) = machine.execute(Rc::new(unbound)));
        check!(name == "no-such-thing");
        check!(!machine.is_running());

        let leave = Block::new(vec![Instruction::Leave]);
        let_assert!(Err(RuntimeError::InvalidOpcode(_)) = machine.execute(Rc::new(leave)));

        let underflow = Block::new(vec![Instruction::Pop]);
        let_assert!(Err(RuntimeError::StackUnderflow) = machine.execute(Rc::new(underflow)));

        let not_applicable = Block::new(vec![Instruction::Push(Value::number(5)), Instruction::Apply(0)]);
        let_assert!(Err(RuntimeError::NotApplicable(found)) = machine.execute(Rc::new(not_applicable)));
        check!(found == "5");
    }
}
