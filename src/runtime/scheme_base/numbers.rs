use core::cmp::Ordering;

use crate::{
    num::{Number, NumberError, Real},
    runtime::{Arity, Builtin, Context, RuntimeError},
    world::value::Value,
};

use super::{arguments, builtin, number, value, Output};

pub(super) static BUILTINS: &[Builtin] = &[
    builtin("number?", Arity::Exact(1), is_number),
    builtin("complex?", Arity::Exact(1), is_number),
    builtin("real?", Arity::Exact(1), is_real),
    builtin("rational?", Arity::Exact(1), is_rational),
    builtin("integer?", Arity::Exact(1), is_integer),
    builtin("exact?", Arity::Exact(1), is_exact),
    builtin("inexact?", Arity::Exact(1), is_inexact),
    builtin("exact-integer?", Arity::Exact(1), is_exact_integer),
    builtin("nan?", Arity::Exact(1), is_nan),
    builtin("=", Arity::Min(2), num_eq),
    builtin("<", Arity::Min(2), less),
    builtin(">", Arity::Min(2), greater),
    builtin("<=", Arity::Min(2), less_equal),
    builtin(">=", Arity::Min(2), greater_equal),
    builtin("zero?", Arity::Exact(1), is_zero),
    builtin("positive?", Arity::Exact(1), is_positive),
    builtin("negative?", Arity::Exact(1), is_negative),
    builtin("odd?", Arity::Exact(1), is_odd),
    builtin("even?", Arity::Exact(1), is_even),
    builtin("max", Arity::Min(1), max),
    builtin("min", Arity::Min(1), min),
    builtin("+", Arity::Min(0), add),
    builtin("*", Arity::Min(0), mul),
    builtin("-", Arity::Min(1), sub),
    builtin("/", Arity::Min(1), div),
    builtin("abs", Arity::Exact(1), abs),
    builtin("quotient", Arity::Exact(2), quotient),
    builtin("remainder", Arity::Exact(2), remainder),
    builtin("modulo", Arity::Exact(2), modulo),
    builtin("gcd", Arity::Min(0), gcd),
    builtin("lcm", Arity::Min(0), lcm),
    builtin("numerator", Arity::Exact(1), numerator),
    builtin("denominator", Arity::Exact(1), denominator),
    builtin("floor", Arity::Exact(1), floor),
    builtin("ceiling", Arity::Exact(1), ceiling),
    builtin("truncate", Arity::Exact(1), truncate),
    builtin("round", Arity::Exact(1), round),
    builtin("square", Arity::Exact(1), square),
    builtin("sqrt", Arity::Exact(1), sqrt),
    builtin("expt", Arity::Exact(2), expt),
    builtin("exp", Arity::Exact(1), exp),
    builtin("log", Arity::Between(1, 2), log),
    builtin("sin", Arity::Exact(1), sin),
    builtin("cos", Arity::Exact(1), cos),
    builtin("tan", Arity::Exact(1), tan),
    builtin("asin", Arity::Exact(1), asin),
    builtin("acos", Arity::Exact(1), acos),
    builtin("atan", Arity::Between(1, 2), atan),
    builtin("make-rectangular", Arity::Exact(2), make_rectangular),
    builtin("make-polar", Arity::Exact(2), make_polar),
    builtin("real-part", Arity::Exact(1), real_part),
    builtin("imag-part", Arity::Exact(1), imag_part),
    builtin("magnitude", Arity::Exact(1), magnitude),
    builtin("angle", Arity::Exact(1), angle),
    Builtin {
        name: "exact",
        arity: Arity::Exact(1),
        func: exact,
        aliases: &["inexact->exact"],
    },
    Builtin {
        name: "inexact",
        arity: Arity::Exact(1),
        func: inexact,
        aliases: &["exact->inexact"],
    },
    builtin("number->string", Arity::Between(1, 2), number_to_string),
    builtin("string->number", Arity::Between(1, 2), string_to_number),
];

fn is_number(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("number?", args)?;
    value(x.as_number().is_some())
}

fn is_real(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("real?", args)?;
    value(x.as_number().is_some_and(Number::is_real))
}

fn is_rational(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("rational?", args)?;
    value(x.as_number().is_some_and(Number::is_rational))
}

fn is_integer(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("integer?", args)?;
    value(x.as_number().is_some_and(Number::is_integer))
}

fn is_exact(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("exact?", args)?;
    value(number("exact?", &x)?.is_exact())
}

fn is_inexact(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("inexact?", args)?;
    value(!number("inexact?", &x)?.is_exact())
}

fn is_exact_integer(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("exact-integer?", args)?;
    value(x.as_number().is_some_and(Number::is_exact_integer))
}

fn is_nan(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("nan?", args)?;
    value(number("nan?", &x)?.is_nan())
}

fn numbers<'v>(operation: &'static str, args: &'v [Value]) -> Result<Vec<&'v Number>, RuntimeError> {
    args.iter().map(|arg| number(operation, arg)).collect()
}

// Every argument is checked, even after the chain is already false.
fn compare(operation: &'static str, args: &[Value], accept: fn(Ordering) -> bool) -> Output {
    let numbers = numbers(operation, args)?;
    let mut result = true;
    for pair in numbers.windows(2) {
        if let [a, b] = pair {
            match a.cmp(b, operation)? {
                Some(ordering) if accept(ordering) => {}
                _ => result = false,
            }
        }
    }
    value(result)
}

fn num_eq(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let numbers = numbers("=", &args)?;
    value(numbers.windows(2).all(|pair| match pair {
        [a, b] => a.num_eq(b),
        _ => true,
    }))
}

fn less(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    compare("<", &args, Ordering::is_lt)
}

fn greater(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    compare(">", &args, Ordering::is_gt)
}

fn less_equal(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    compare("<=", &args, Ordering::is_le)
}

fn greater_equal(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    compare(">=", &args, Ordering::is_ge)
}

fn real<'n>(operation: &'static str, value: &'n Value) -> Result<&'n Real, RuntimeError> {
    Ok(number(operation, value)?.as_real(operation)?)
}

fn is_zero(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("zero?", args)?;
    value(number("zero?", &x)?.is_zero())
}

fn is_positive(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("positive?", args)?;
    let x = real("positive?", &x)?;
    value(!x.is_negative() && !x.is_zero() && !x.to_f64().is_nan())
}

fn is_negative(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("negative?", args)?;
    value(real("negative?", &x)?.is_negative())
}

fn is_odd(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("odd?", args)?;
    let rem = number("odd?", &x)?.remainder(&Number::integer(2))?;
    value(!rem.is_zero())
}

fn is_even(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("even?", args)?;
    let rem = number("even?", &x)?.remainder(&Number::integer(2))?;
    value(rem.is_zero())
}

// An inexact argument anywhere makes the result inexact.
fn extremum(operation: &'static str, args: &[Value], keep: Ordering) -> Output {
    let numbers = numbers(operation, args)?;
    let mut best: Option<&Number> = None;
    for &n in &numbers {
        best = match best {
            Some(b) if b.cmp(n, operation)? != Some(keep) && !n.is_nan() => Some(n),
            Some(b) => Some(b),
            None => {
                n.as_real(operation)?;
                Some(n)
            }
        };
    }
    let Some(best) = best else {
        return Err(RuntimeError::Arity {
            procedure: operation.to_owned(),
            expected: Arity::Min(1),
            found: 0,
        });
    };
    if numbers.iter().all(|n| n.is_exact()) {
        value(best.clone())
    } else {
        value(best.to_inexact())
    }
}

fn max(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    extremum("max", &args, Ordering::Greater)
}

fn min(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    extremum("min", &args, Ordering::Less)
}

fn add(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let sum = numbers("+", &args)?
        .into_iter()
        .fold(Number::integer(0), |sum, n| sum.add(n));
    value(sum)
}

fn mul(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let product = numbers("*", &args)?
        .into_iter()
        .fold(Number::integer(1), |product, n| product.mul(n));
    value(product)
}

fn sub(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    match numbers("-", &args)?.as_slice() {
        [only] => value(only.negate()),
        [first, rest @ ..] => value(rest.iter().fold((*first).clone(), |acc, n| acc.sub(n))),
        [] => value(Number::integer(0)),
    }
}

fn div(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    match numbers("/", &args)?.as_slice() {
        [only] => value(only.inverse()?),
        [first, rest @ ..] => {
            let mut quotient = (*first).clone();
            for n in rest {
                quotient = quotient.div(n)?;
            }
            value(quotient)
        }
        [] => value(Number::integer(1)),
    }
}

fn unary(operation: &'static str, args: Vec<Value>, op: fn(&Number) -> Result<Number, NumberError>) -> Output {
    let [x] = arguments(operation, args)?;
    value(op(number(operation, &x)?)?)
}

fn binary(
    operation: &'static str,
    args: Vec<Value>,
    op: fn(&Number, &Number) -> Result<Number, NumberError>,
) -> Output {
    let [a, b] = arguments(operation, args)?;
    value(op(number(operation, &a)?, number(operation, &b)?)?)
}

fn abs(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    unary("abs", args, Number::abs)
}

fn quotient(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    binary("quotient", args, Number::quotient)
}

fn remainder(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    binary("remainder", args, Number::remainder)
}

fn modulo(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    binary("modulo", args, Number::modulo)
}

fn gcd(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let mut result = Number::integer(0);
    for n in numbers("gcd", &args)? {
        result = result.gcd(n)?;
    }
    value(result)
}

fn lcm(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let mut result = Number::integer(1);
    for n in numbers("lcm", &args)? {
        result = result.lcm(n)?;
    }
    value(result)
}

fn numerator(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    unary("numerator", args, Number::numerator)
}

fn denominator(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    unary("denominator", args, Number::denominator)
}

fn floor(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    unary("floor", args, Number::floor)
}

fn ceiling(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    unary("ceiling", args, Number::ceiling)
}

fn truncate(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    unary("truncate", args, Number::truncate)
}

fn round(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    unary("round", args, Number::round)
}

fn square(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("square", args)?;
    let x = number("square", &x)?;
    value(x.mul(x))
}

fn sqrt(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [x] = arguments("sqrt", args)?;
    value(number("sqrt", &x)?.sqrt())
}

fn expt(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    binary("expt", args, Number::expt)
}

fn transcendental(operation: &'static str, args: Vec<Value>, func: fn(f64) -> f64) -> Output {
    let [x] = arguments(operation, args)?;
    value(number(operation, &x)?.transcendental(operation, func)?)
}

fn exp(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    transcendental("exp", args, f64::exp)
}

fn log(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    match args.as_slice() {
        [x, base] => {
            let x = real("log", x)?.to_f64();
            let base = real("log", base)?.to_f64();
            value(Number::inexact(x.ln() / base.ln()))
        }
        _ => transcendental("log", args, f64::ln),
    }
}

fn sin(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    transcendental("sin", args, f64::sin)
}

fn cos(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    transcendental("cos", args, f64::cos)
}

fn tan(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    transcendental("tan", args, f64::tan)
}

fn asin(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    transcendental("asin", args, f64::asin)
}

fn acos(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    transcendental("acos", args, f64::acos)
}

fn atan(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    match args.as_slice() {
        [y, x] => {
            let y = real("atan", y)?.to_f64();
            let x = real("atan", x)?.to_f64();
            value(Number::inexact(y.atan2(x)))
        }
        _ => transcendental("atan", args, f64::atan),
    }
}

fn make_rectangular(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [re, im] = arguments("make-rectangular", args)?;
    let re = real("make-rectangular", &re)?.clone();
    let im = real("make-rectangular", &im)?.clone();
    value(Number::rectangular(re, im))
}

fn make_polar(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [magnitude, angle] = arguments("make-polar", args)?;
    let magnitude = real("make-polar", &magnitude)?.to_f64();
    let angle = real("make-polar", &angle)?.to_f64();
    value(Number::rectangular(
        Real::Inexact(magnitude * angle.cos()),
        Real::Inexact(magnitude * angle.sin()),
    ))
}

fn real_part(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [z] = arguments("real-part", args)?;
    value(Number::from_real(number("real-part", &z)?.real_part().clone()))
}

fn imag_part(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [z] = arguments("imag-part", args)?;
    value(Number::from_real(number("imag-part", &z)?.imag_part().clone()))
}

fn magnitude(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [z] = arguments("magnitude", args)?;
    value(number("magnitude", &z)?.magnitude())
}

fn angle(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [z] = arguments("angle", args)?;
    value(number("angle", &z)?.angle())
}

fn exact(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    unary("exact", args, Number::to_exact)
}

fn inexact(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let [z] = arguments("inexact", args)?;
    value(number("inexact", &z)?.to_inexact())
}

fn radix(operation: &'static str, value: Option<&Value>) -> Result<u32, RuntimeError> {
    match value {
        None => Ok(10),
        Some(v) => match v.as_number().and_then(Number::to_i64) {
            Some(r @ (2 | 8 | 10 | 16)) => Ok(r as u32),
            _ => Err(RuntimeError::wrong_type(operation, "a radix of 2, 8, 10 or 16", v)),
        },
    }
}

fn number_to_string(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let Some((z, rest)) = args.split_first() else {
        return value(Value::string(""));
    };
    let radix = radix("number->string", rest.first())?;
    match number("number->string", z)?.to_string_radix(radix) {
        Some(text) => value(Value::string(&text)),
        None => Err(RuntimeError::wrong_type(
            "number->string",
            "an exact number for a non-decimal radix",
            z,
        )),
    }
}

fn string_to_number(_: &mut Context<'_>, args: Vec<Value>) -> Output {
    let Some((text, rest)) = args.split_first() else {
        return value(false);
    };
    let text = super::string("string->number", text)?;
    let radix = radix("string->number", rest.first())?;
    let parsed = Number::parse(&text.borrow(), radix);
    match parsed {
        Some(n) => value(n),
        None => value(false),
    }
}
