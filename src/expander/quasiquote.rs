use crate::{
    ast::Expr,
    compiler::environment::Environment,
    world::{self, symbol::Symbol, value::Value},
};

use super::{expand_expr, strip_generated, ExpandError};

// The list procedures are embedded by value, so rebinding `cons` in user code
// does not change what a quasiquote builds.
fn builtin(name: &'static str) -> Result<Expr, ExpandError> {
    world::builtin(Symbol::intern(name))
        .map(Expr::Literal)
        .ok_or(ExpandError::MissingBuiltin(name))
}

/// `(keyword datum)` gives back the datum
fn single_argument(form: &Value, keyword: &str) -> Option<Value> {
    let pair = form.as_pair()?;
    if pair.car().as_symbol()?.base() != Symbol::intern(keyword) {
        return None;
    }
    match pair.cdr().proper_list()?.as_slice() {
        [argument] => Some(argument.clone()),
        _ => None,
    }
}

fn cons(car: Expr, cdr: Expr) -> Result<Expr, ExpandError> {
    Ok(match (car, cdr) {
        (Expr::Quote(car), Expr::Quote(cdr)) => Expr::Quote(Value::cons(car, cdr)),
        (car, cdr) => Expr::call(builtin("cons")?, vec![car, cdr]),
    })
}

fn tagged(keyword: &str, inner: Expr) -> Result<Expr, ExpandError> {
    let tail = cons(inner, Expr::Quote(Value::Nil))?;
    cons(Expr::Quote(Value::symbol(keyword)), tail)
}

/// Expands the body of a quasiquote at nesting `depth` (1 for the outermost).
pub(super) fn expand(template: &Value, depth: usize, env: &Environment) -> Result<Expr, ExpandError> {
    match template {
        Value::Pair(pair) => {
            if let Some(inner) = single_argument(template, "unquote") {
                return if depth == 1 {
                    expand_expr(&inner, env)
                } else {
                    tagged("unquote", expand(&inner, depth - 1, env)?)
                };
            }
            if let Some(inner) = single_argument(template, "quasiquote") {
                return tagged("quasiquote", expand(&inner, depth + 1, env)?);
            }
            let head = pair.car();
            let rest = expand(&pair.cdr(), depth, env)?;
            match single_argument(&head, "unquote-splicing") {
                Some(inner) if depth == 1 => Ok(Expr::call(
                    builtin("append")?,
                    vec![expand_expr(&inner, env)?, rest],
                )),
                Some(inner) => cons(tagged("unquote-splicing", expand(&inner, depth - 1, env)?)?, rest),
                None => cons(expand(&head, depth, env)?, rest),
            }
        }
        Value::Vector(items) => {
            let list = Value::list(items.borrow().iter().cloned());
            match expand(&list, depth, env)? {
                Expr::Quote(_) => Ok(Expr::Quote(strip_generated(template))),
                list => Ok(Expr::call(builtin("list->vector")?, vec![list])),
            }
        }
        other => Ok(Expr::Quote(strip_generated(other))),
    }
}
