//! Control features and output.
//!
//! `call/cc`, `apply` and `values` hand a request back to the machine.
//! `dynamic-wind`, `call-with-values` and `eval` need to run Scheme code in the
//! middle of their work, so they are assembled directly from instructions.
use std::rc::Rc;

use crate::{
    compiler::{
        bytecode::{Block, Instruction, Template},
        environment::Environment,
    },
    runtime::{Arity, Builtin, CallbackReturn, Closure, Context, Procedure, RuntimeError},
    world::{
        symbol::Symbol,
        value::{OutputPort, Value},
    },
};

use super::{arguments, builtin, character, list, string, unspecified, value, Output};

pub(super) static BUILTINS: &[Builtin] = &[
    builtin("procedure?", Arity::Exact(1), is_procedure),
    builtin("apply", Arity::Min(2), apply),
    Builtin {
        name: "call/cc",
        arity: Arity::Exact(1),
        func: call_cc,
        aliases: &["call-with-current-continuation"],
    },
    builtin("values", Arity::Min(0), values),
    builtin("interaction-environment", Arity::Exact(0), interaction_environment),
    builtin("error", Arity::Min(1), error),
    builtin("current-output-port", Arity::Exact(0), current_output_port),
    builtin("display", Arity::Between(1, 2), display),
    builtin("write", Arity::Between(1, 2), write),
    builtin("newline", Arity::Between(0, 1), newline),
    builtin("write-string", Arity::Between(1, 2), write_string),
    builtin("write-char", Arity::Between(1, 2), write_char),
];

fn is_procedure(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("procedure?", args)?;
    value(matches!(x, Value::Procedure(_)))
}

// (apply f a b '(c d)) calls (f a b c d)
fn apply(_: &mut Context<'_>, mut args: Vec<Value>) -> Output {
    let spread = args.pop().unwrap_or_default();
    let mut args = args.into_iter();
    let Some(procedure) = args.next() else {
        return Err(RuntimeError::Arity {
            procedure: "apply".into(),
            expected: Arity::Min(2),
            found: 1,
        });
    };
    let mut arguments: Vec<Value> = args.collect();
    arguments.extend(list("apply", &spread)?);
    Ok(CallbackReturn::Apply {
        procedure,
        arguments,
    })
}

fn call_cc(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [receiver] = arguments("call/cc", args)?;
    Ok(CallbackReturn::CallCc(receiver))
}

fn values(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    Ok(CallbackReturn::Values(args))
}

fn interaction_environment(context: &mut Context<'_>, _: Vec<Value>) -> Output {
    value(Value::Environment(context.global.clone()))
}

fn error(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let mut args = args.iter();
    let message = match args.next() {
        Some(Value::String(text)) => text.borrow().clone(),
        Some(other) => other.write().to_string(),
        None => String::new(),
    };
    let irritants = args.map(|irritant| format!(" {}", irritant.write())).collect();
    Err(RuntimeError::User { message, irritants })
}

fn current_output_port(context: &mut Context<'_>, _: Vec<Value>) -> Output {
    value(Value::Port(context.output.clone()))
}

fn port(context: &Context<'_>, operation: &'static str, arg: Option<&Value>) -> Result<OutputPort, RuntimeError> {
    match arg {
        None => Ok(context.output.clone()),
        Some(Value::Port(port)) => Ok(port.clone()),
        Some(other) => Err(RuntimeError::wrong_type(operation, "an output port", other)),
    }
}

fn emit(context: &mut Context<'_>, operation: &'static str, text: &str, arg: Option<&Value>) -> Output {
    port(context, operation, arg)?.write_text(text)?;
    unspecified()
}

fn display(context: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x, rest @ ..] = args.as_slice() else {
        return unspecified();
    };
    emit(context, "display", &x.display().to_string(), rest.first())
}

fn write(context: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x, rest @ ..] = args.as_slice() else {
        return unspecified();
    };
    emit(context, "write", &x.write().to_string(), rest.first())
}

fn newline(context: &mut Context<'_>, args: Vec<Value>) -> Output {
    emit(context, "newline", "\n", args.first())
}

fn write_string(context: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [s, rest @ ..] = args.as_slice() else {
        return unspecified();
    };
    let text = string("write-string", s)?.borrow().clone();
    emit(context, "write-string", &text, rest.first())
}

fn write_char(context: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [c, rest @ ..] = args.as_slice() else {
        return unspecified();
    };
    let c = character("write-char", c)?;
    emit(context, "write-char", c.encode_utf8(&mut [0; 4]), rest.first())
}

fn assemble(name: &str, params: &[Symbol], rest: Option<Symbol>, code: Vec<Instruction>) -> Value {
    let template = Template {
        name: Some(Symbol::intern(name)),
        params: params.to_vec(),
        rest,
        block: Rc::new(Block::new(code)),
    };
    let closure = Closure {
        template: Rc::new(template),
        env: Environment::new(),
    };
    Value::Procedure(Procedure::Closure(Rc::new(closure)))
}

// Pops the arguments into a fresh frame, last parameter first.
fn bind(names: &[Symbol]) -> Vec<Instruction> {
    let mut code = vec![Instruction::Enter];
    for name in names.iter().rev() {
        code.push(Instruction::Res(*name));
        code.push(Instruction::Set(*name));
    }
    code
}

pub(super) fn assembled() -> Vec<(&'static str, Value)> {
    vec![
        ("dynamic-wind", dynamic_wind()),
        ("call-with-values", call_with_values()),
        ("eval", eval()),
    ]
}

// before runs outside the extent, then the guard goes up for the thunk, and
// comes down again before after runs
fn dynamic_wind() -> Value {
    let params = ["before", "thunk", "after"].map(Symbol::intern);
    let [before, thunk, after] = params;
    let mut code = bind(&params);
    code.extend([
        Instruction::Load(before),
        Instruction::Apply(0),
        Instruction::Pop,
        Instruction::Load(before),
        Instruction::Load(after),
        Instruction::Wind,
        Instruction::Load(thunk),
        Instruction::Apply(0),
        Instruction::Unwind,
        Instruction::Load(after),
        Instruction::Apply(0),
        Instruction::Pop,
        Instruction::Ret,
    ]);
    assemble("dynamic-wind", &params, None, code)
}

fn call_with_values() -> Value {
    let params = ["producer", "consumer"].map(Symbol::intern);
    let [producer, consumer] = params;
    let mut code = bind(&params);
    code.extend([
        Instruction::Load(producer),
        Instruction::Apply(0),
        Instruction::Load(consumer),
        Instruction::Leave,
        Instruction::ApplyV,
    ]);
    assemble("call-with-values", &params, None, code)
}

// (eval expression [environment])
fn eval() -> Value {
    let expression = Symbol::intern("expression");
    let environment = Symbol::intern("environment");
    let mut code = bind(&[expression, environment]);
    code.extend([
        Instruction::Load(expression),
        Instruction::Load(environment),
        Instruction::Eval,
        Instruction::Ret,
    ]);
    assemble("eval", &[expression], Some(environment), code)
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::assembled;
    use crate::{
        runtime::{Arity, Procedure},
        world::value::Value,
    };

    #[test]
    fn assembled_procedures_report_arity() {
        let procedures = assembled();
        let arity = |name: &str| {
            procedures.iter().find(|(n, _)| *n == name).and_then(|(_, p)| match p {
                Value::Procedure(procedure @ Procedure::Closure(_)) => Some(procedure.arity()),
                _ => None,
            })
        };
        check!(arity("dynamic-wind") == Some(Arity::Exact(3)));
        check!(arity("call-with-values") == Some(Arity::Exact(2)));
        check!(arity("eval") == Some(Arity::Min(1)));
        let_assert!(Some((_, Value::Procedure(eval))) = procedures.iter().find(|(n, _)| *n == "eval"));
        check!(eval.name().as_deref() == Some("eval"));
    }
}
