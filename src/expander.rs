//! Macro expansion: rewrites data until only primitive forms remain.
//!
//! Expansion is driven by the environment. A list whose head names syntax is
//! rewritten (by Rust code for primitive syntax, by a [`SyntaxRules`]
//! transformer otherwise) and the result expanded again. Anything else that is
//! a list becomes a procedure call.
//!
//! Hygiene works by renaming. Every identifier a template inserts is replaced
//! by a fresh one that resolves where the macro was defined, and every local
//! binder is given a fresh run-time name. Since variables are looked up by name
//! at run time, no binding in user code can capture what a macro refers to and
//! no binding a macro introduces can capture user code.
//!
//! Top-level definitions keep their names, as do quoted data.
use core::fmt;
use std::rc::Rc;

use crate::{
    ast::{Expr, Lambda},
    compiler::{
        environment::{Binding, Environment},
        CompileError,
    },
    world::{symbol::Symbol, value::Value},
};

pub use syntax_rules::SyntaxRules;

mod quasiquote;
mod syntax_rules;

#[derive(thiserror::Error, Debug, Clone)]
pub enum ExpandError {
    #[error("ill-formed special form: {form}")]
    IllFormed { keyword: String, form: String },
    #[error("bad literal list in syntax-rules: {0}")]
    BadLiterals(String),
    #[error("too many ellipses: `{variable}` repeats a different number of times than its neighbours")]
    EllipsisMismatch { variable: String },
    #[error("`{variable}` is used at the wrong ellipsis depth")]
    EllipsisDepth { variable: String },
    #[error("syntactic keyword `{0}` used as a variable")]
    KeywordAsVariable(String),
    #[error("builtin `{0}` is missing, the world is not initialized")]
    MissingBuiltin(&'static str),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// Syntax implemented directly by the expander
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Quote,
    Quasiquote,
    Lambda,
    If,
    Define,
    Set,
    Begin,
    DefineSyntax,
    LetSyntax,
    LetrecSyntax,
    SyntaxRules,
}

pub const PRIMITIVES: &[(&str, Primitive)] = &[
    ("quote", Primitive::Quote),
    ("quasiquote", Primitive::Quasiquote),
    ("lambda", Primitive::Lambda),
    ("if", Primitive::If),
    ("define", Primitive::Define),
    ("set!", Primitive::Set),
    ("begin", Primitive::Begin),
    ("define-syntax", Primitive::DefineSyntax),
    ("let-syntax", Primitive::LetSyntax),
    ("letrec-syntax", Primitive::LetrecSyntax),
    ("syntax-rules", Primitive::SyntaxRules),
];

/// A syntax binding
#[derive(Clone)]
pub enum Syntax {
    Primitive(Primitive),
    Rules(Rc<SyntaxRules>),
}

impl fmt::Debug for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(primitive) => write!(f, "#<primitive syntax {primitive:?}>"),
            Self::Rules(_) => write!(f, "#<syntax-rules>"),
        }
    }
}

fn ill_formed(keyword: Symbol, form: &Value) -> ExpandError {
    ExpandError::IllFormed {
        keyword: keyword.to_string(),
        form: form.to_string(),
    }
}

/// Expands one top-level datum. Top-level `begin` splices, so one datum may
/// give several expressions (or none, e.g. for an empty `begin`).
pub fn expand_toplevel(datum: &Value, env: &Environment) -> Result<Vec<Expr>, ExpandError> {
    let exprs = expand_sequence(vec![datum.clone()], env)?;
    tracing::trace!(datum = %datum, forms = exprs.len(), "expanded top-level datum");
    Ok(exprs)
}

enum BodyForm {
    Expanded(Expr),
    Deferred(Value),
}

/// Expands a top-level sequence or a body, splicing `begin`s found at its head.
///
/// Definitions are found before anything is expanded further, so a body's
/// procedures can refer to each other regardless of order.
fn expand_sequence(forms: Vec<Value>, env: &Environment) -> Result<Vec<Expr>, ExpandError> {
    let mut pending = forms;
    pending.reverse();
    let mut body = vec![];
    while let Some(form) = pending.pop() {
        let form = expand_macro_use(form, env)?;
        match syntax_head(&form, env) {
            Some((Syntax::Primitive(Primitive::Begin), keyword)) => {
                let forms = form.proper_list().ok_or_else(|| ill_formed(keyword, &form))?;
                pending.extend(forms.into_iter().skip(1).rev());
            }
            Some((Syntax::Primitive(Primitive::DefineSyntax), _)) => {
                body.push(BodyForm::Expanded(expand_expr(&form, env)?));
            }
            Some((Syntax::Primitive(Primitive::Define), _)) => {
                if let Some(name) = defined_name(&form) {
                    env.declare(name);
                }
                body.push(BodyForm::Deferred(form));
            }
            _ => body.push(BodyForm::Deferred(form)),
        }
    }
    body.into_iter()
        .map(|form| match form {
            BodyForm::Expanded(expr) => Ok(expr),
            BodyForm::Deferred(form) => expand_expr(&form, env),
        })
        .collect()
}

// the name a `define` form binds, digging through curried signatures
fn defined_name(form: &Value) -> Option<Symbol> {
    let mut target = form.cdr()?.car()?;
    while let Value::Pair(signature) = &target {
        let next = signature.car();
        target = next;
    }
    target.as_symbol()
}

/// The run-time name of the variable `name` refers to
fn resolve(name: Symbol, env: &Environment) -> Result<Symbol, ExpandError> {
    match env.lookup(name) {
        Some(Binding::Variable(runtime)) => Ok(runtime),
        Some(Binding::Syntax(_)) => Err(ExpandError::KeywordAsVariable(name.to_string())),
        // unbound, so a global that may be defined later
        None => Ok(name.base()),
    }
}

/// The syntax a form's head names, if any
fn syntax_head(form: &Value, env: &Environment) -> Option<(Syntax, Symbol)> {
    let keyword = form.car()?.as_symbol()?;
    match env.lookup(keyword)? {
        Binding::Syntax(syntax) => Some((syntax, keyword)),
        Binding::Variable(_) => None,
    }
}

// Rewrites macro uses at the head of `form` until a primitive or a non-macro remains.
fn expand_macro_use(mut form: Value, env: &Environment) -> Result<Value, ExpandError> {
    while let Some((Syntax::Rules(rules), keyword)) = syntax_head(&form, env) {
        form = rules.transform(keyword, &form, env)?;
    }
    Ok(form)
}

/// Expands a datum in expression position.
pub fn expand_expr(datum: &Value, env: &Environment) -> Result<Expr, ExpandError> {
    match datum {
        Value::Symbol(name) => Ok(Expr::Reference(resolve(*name, env)?)),
        Value::Pair(_) => match syntax_head(datum, env) {
            Some((Syntax::Primitive(primitive), keyword)) => expand_primitive(primitive, keyword, datum, env),
            Some((Syntax::Rules(rules), keyword)) => {
                let output = rules.transform(keyword, datum, env)?;
                expand_expr(&output, env)
            }
            None => expand_call(datum, env),
        },
        Value::Nil => Err(CompileError::EmptyCombination.into()),
        other => Ok(Expr::Literal(other.clone())),
    }
}

fn expand_call(form: &Value, env: &Environment) -> Result<Expr, ExpandError> {
    let parts = form
        .proper_list()
        .ok_or_else(|| CompileError::ImproperCall(form.to_string()))?;
    let Some((operator, operands)) = parts.split_first() else {
        return Err(CompileError::EmptyCombination.into());
    };
    let operator = expand_expr(operator, env)?;
    let operands = operands
        .iter()
        .map(|operand| expand_expr(operand, env))
        .collect::<Result<_, _>>()?;
    Ok(Expr::call(operator, operands))
}

fn expand_primitive(primitive: Primitive, keyword: Symbol, form: &Value, env: &Environment) -> Result<Expr, ExpandError> {
    let parts = form.proper_list().ok_or_else(|| ill_formed(keyword, form))?;
    let args = &parts[1..];
    match (primitive, args) {
        (Primitive::Quote, [datum]) => Ok(Expr::Quote(strip_generated(datum))),
        (Primitive::Quasiquote, [template]) => quasiquote::expand(template, 1, env),
        (Primitive::Lambda, [formals, body @ ..]) if !body.is_empty() => {
            let (params, rest) = parse_formals(formals).ok_or_else(|| ill_formed(keyword, form))?;
            expand_lambda(params, rest, body, env)
        }
        (Primitive::If, [test, consequent]) => Ok(Expr::If {
            test: Box::new(expand_expr(test, env)?),
            consequent: Box::new(expand_expr(consequent, env)?),
            alternate: None,
        }),
        (Primitive::If, [test, consequent, alternate]) => Ok(Expr::If {
            test: Box::new(expand_expr(test, env)?),
            consequent: Box::new(expand_expr(consequent, env)?),
            alternate: Some(Box::new(expand_expr(alternate, env)?)),
        }),
        (Primitive::Define, [target, rest @ ..]) => expand_define(keyword, form, target, rest, env),
        (Primitive::Set, [Value::Symbol(name), value]) => Ok(Expr::Assign {
            name: resolve(*name, env)?,
            value: Box::new(expand_expr(value, env)?),
        }),
        (Primitive::Begin, []) => Ok(Expr::Literal(Value::Unspecified)),
        (Primitive::Begin, [only]) => expand_expr(only, env),
        (Primitive::Begin, body) => {
            // in expression position, a body becomes an immediately applied thunk
            let scope = env.child();
            let body = expand_sequence(body.to_vec(), &scope)?;
            Ok(Expr::call(Expr::lambda(vec![], None, body), vec![]))
        }
        (Primitive::DefineSyntax, [Value::Symbol(name), spec]) => {
            let syntax = transformer(spec, env)?;
            env.define_syntax(*name, syntax);
            Ok(Expr::Literal(Value::Unspecified))
        }
        (Primitive::LetSyntax, [bindings, body @ ..]) => expand_let_syntax(false, keyword, form, bindings, body, env),
        (Primitive::LetrecSyntax, [bindings, body @ ..]) => expand_let_syntax(true, keyword, form, bindings, body, env),
        _ => Err(ill_formed(keyword, form)),
    }
}

fn parse_formals(formals: &Value) -> Option<(Vec<Symbol>, Option<Symbol>)> {
    let (items, tail) = formals.list_parts()?;
    let params = items.iter().map(Value::as_symbol).collect::<Option<Vec<_>>>()?;
    let rest = match tail {
        Value::Nil => None,
        Value::Symbol(rest) => Some(rest),
        _ => return None,
    };
    Some((params, rest))
}

fn expand_lambda(params: Vec<Symbol>, rest: Option<Symbol>, body: &[Value], env: &Environment) -> Result<Expr, ExpandError> {
    let scope = env.child();
    let params = params.into_iter().map(|name| scope.declare(name)).collect();
    let rest = rest.map(|name| scope.declare(name));
    let body = expand_sequence(body.to_vec(), &scope)?;
    Ok(Expr::Lambda(Rc::new(Lambda::new(None, params, rest, body))))
}

fn expand_define(keyword: Symbol, form: &Value, target: &Value, rest: &[Value], env: &Environment) -> Result<Expr, ExpandError> {
    match (target, rest) {
        (Value::Symbol(name), []) => Ok(Expr::Define {
            name: env.declare(*name),
            value: Box::new(Expr::Literal(Value::Unspecified)),
        }),
        (Value::Symbol(name), [value]) => {
            let runtime = env.declare(*name);
            let value = expand_expr(value, env)?.named(name.base());
            Ok(Expr::Define {
                name: runtime,
                value: Box::new(value),
            })
        }
        // (define (name . formals) body ...), possibly curried
        (Value::Pair(signature), body) if !body.is_empty() => match signature.car() {
            Value::Symbol(name) => {
                let runtime = env.declare(name);
                let (params, rest) =
                    parse_formals(&signature.cdr()).ok_or_else(|| ill_formed(keyword, form))?;
                let value = expand_lambda(params, rest, body, env)?.named(name.base());
                Ok(Expr::Define {
                    name: runtime,
                    value: Box::new(value),
                })
            }
            inner @ Value::Pair(_) => {
                let lambda = Value::list_with_tail(
                    [Value::Symbol(Symbol::intern("lambda")), signature.cdr()],
                    Value::list(body.iter().cloned()),
                );
                expand_define(keyword, form, &inner, &[lambda], env)
            }
            _ => Err(ill_formed(keyword, form)),
        },
        _ => Err(ill_formed(keyword, form)),
    }
}

fn syntax_rules(spec: &Value, env: &Environment) -> Result<SyntaxRules, ExpandError> {
    match syntax_head(spec, env) {
        Some((Syntax::Primitive(Primitive::SyntaxRules), _)) => SyntaxRules::parse(spec, env),
        _ => Err(ExpandError::IllFormed {
            keyword: "define-syntax".into(),
            form: spec.to_string(),
        }),
    }
}

/// Evaluates a transformer spec: a `syntax-rules` form, or a keyword to alias.
fn transformer(spec: &Value, env: &Environment) -> Result<Syntax, ExpandError> {
    match spec {
        Value::Symbol(name) => env
            .get_syntax(*name)
            .ok_or_else(|| ill_formed(*name, spec)),
        _ => Ok(Syntax::Rules(Rc::new(syntax_rules(spec, env)?))),
    }
}

fn expand_let_syntax(
    recursive: bool,
    keyword: Symbol,
    form: &Value,
    bindings: &Value,
    body: &[Value],
    env: &Environment,
) -> Result<Expr, ExpandError> {
    let bindings = bindings
        .proper_list()
        .ok_or_else(|| ill_formed(keyword, form))?
        .iter()
        .map(|binding| match binding.proper_list().as_deref() {
            Some([Value::Symbol(name), spec]) => Ok((*name, spec.clone())),
            _ => Err(ill_formed(keyword, form)),
        })
        .collect::<Result<Vec<_>, _>>()?;

    // transformers of `letrec-syntax` see each other, those of `let-syntax` do not
    let scope = env.child();
    let spec_env = if recursive { &scope } else { env };
    for (name, spec) in &bindings {
        scope.define_syntax(*name, transformer(spec, spec_env)?);
    }
    tracing::trace!(keywords = bindings.len(), recursive, "let-syntax scope");

    let body = expand_sequence(body.to_vec(), &scope.child())?;
    Ok(Expr::call(Expr::lambda(vec![], None, body), vec![]))
}

/// Quoted data must not leak renamed symbols.
pub(super) fn strip_generated(datum: &Value) -> Value {
    fn contains_generated(datum: &Value) -> bool {
        let mut stack = vec![datum.clone()];
        while let Some(datum) = stack.pop() {
            match &datum {
                Value::Symbol(symbol) if symbol.is_generated() => return true,
                Value::Pair(pair) => {
                    stack.push(pair.car());
                    stack.push(pair.cdr());
                }
                Value::Vector(items) => stack.extend(items.borrow().iter().cloned()),
                _ => {}
            }
        }
        false
    }

    fn rebuild(datum: &Value) -> Value {
        match datum {
            Value::Symbol(symbol) => Value::Symbol(symbol.base()),
            Value::Pair(_) => match datum.list_parts() {
                Some((items, tail)) => Value::list_with_tail(items.iter().map(rebuild), rebuild(&tail)),
                None => datum.clone(),
            },
            Value::Vector(items) => Value::vector(items.borrow().iter().map(rebuild).collect()),
            other => other.clone(),
        }
    }

    if contains_generated(datum) {
        rebuild(datum)
    } else {
        datum.clone()
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::{expand_toplevel, ExpandError};
    use crate::{
        ast::Expr,
        compiler::{environment::Environment, CompileError},
        reader::parse,
        world,
    };

    fn expand(text: &str) -> Result<Vec<Expr>, ExpandError> {
        let_assert!(Ok(()) = world::initialize());
        let env = Environment::new();
        let mut exprs = vec![];
        let_assert!(Ok(program) = parse(text));
        for datum in &program {
            exprs.extend(expand_toplevel(datum, &env)?);
        }
        Ok(exprs)
    }

    #[test]
    fn begin_splices_at_top_level() {
        let_assert!(Ok(exprs) = expand("(begin (define a 1) (begin) (define b 2))"));
        check!(exprs.len() == 2);
        let_assert!(Ok(exprs) = expand("(begin)"));
        check!(exprs.is_empty());
    }

    #[test]
    fn define_shorthand_names_the_lambda() {
        let_assert!(Ok(exprs) = expand("(define ((adder n) m) (+ n m))"));
        let_assert!([Expr::Define { value, .. }] = exprs.as_slice());
        let_assert!(Expr::Lambda(lambda) = value.as_ref());
        check!(lambda.name.map(|n| n.to_string()).as_deref() == Some("adder"));
        check!(lambda.params.len() == 1);
        let_assert!([Expr::Lambda(inner)] = lambda.body.as_slice());
        check!(inner.params.len() == 1);
    }

    #[test]
    fn derived_syntax_reduces_to_primitives() {
        let_assert!(Ok(exprs) = expand("(let ((x 2) (y 3)) (* x y))"));
        let_assert!([Expr::Call { operator, operands }] = exprs.as_slice());
        let_assert!(Expr::Lambda(lambda) = operator.as_ref());
        check!(lambda.params.len() == 2);
        check!(operands.len() == 2);
    }

    #[test]
    fn reports_malformed_forms() {
        let_assert!(Err(ExpandError::IllFormed { keyword, .. }) = expand("(if)"));
        check!(keyword == "if");
        let_assert!(Err(ExpandError::KeywordAsVariable(name)) = expand("(car lambda)"));
        check!(name == "lambda");
        let_assert!(Err(ExpandError::Compile(CompileError::ImproperCall(_))) = expand("(f a . b)"));
        let_assert!(Err(ExpandError::Compile(CompileError::EmptyCombination)) = expand("()"));
    }

    #[test]
    fn let_syntax_templates_see_outer_locals() {
        // `x` in the template refers to the lambda parameter, not the inner let
        let text = "(lambda (x) (let-syntax ((get (syntax-rules () ((_) x)))) (let ((x 2)) (get))))";
        let_assert!(Ok(exprs) = expand(text));
        let_assert!([Expr::Lambda(outer)] = exprs.as_slice());
        let_assert!([param] = outer.params.as_slice());
        let_assert!([Expr::Call { operator, .. }] = outer.body.as_slice());
        let_assert!(Expr::Lambda(scope) = operator.as_ref());
        let_assert!([Expr::Call { operator, .. }] = scope.body.as_slice());
        let_assert!(Expr::Lambda(shadowing) = operator.as_ref());
        let_assert!([shadow] = shadowing.params.as_slice());
        let_assert!([Expr::Reference(target)] = shadowing.body.as_slice());
        check!(target == param);
        check!(shadow != param);
    }

    #[test]
    fn local_binders_are_renamed_and_globals_are_not() {
        let_assert!(Ok(exprs) = expand("(define (f x) (define y x) y)"));
        let_assert!([Expr::Define { name, value }] = exprs.as_slice());
        check!(!name.is_generated());
        let_assert!(Expr::Lambda(lambda) = value.as_ref());
        let_assert!([x] = lambda.params.as_slice());
        check!(x.is_generated());
        let_assert!([Expr::Define { name: y, value }, Expr::Reference(result)] = lambda.body.as_slice());
        check!(y.is_generated());
        check!(result == y);
        let_assert!(Expr::Reference(source) = value.as_ref());
        check!(source == x);
    }

    #[test]
    fn template_identifiers_are_quoted_by_name() {
        let text = "(define-syntax tag (syntax-rules () ((_ v) `(label ,v)))) (tag 1)";
        let_assert!(Ok(exprs) = expand(text));
        let_assert!([_, Expr::Call { operands, .. }] = exprs.as_slice());
        let_assert!([Expr::Quote(label), _] = operands.as_slice());
        let_assert!(Some(symbol) = label.as_symbol());
        check!(!symbol.is_generated());
        check!(symbol.to_string() == "label");
    }
}
