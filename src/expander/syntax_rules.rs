//! `syntax-rules` transformers: parsing the rule set, matching a macro use
//! against each pattern in turn, and instantiating the winning template.
//!
//! Matching produces a binding tree per pattern variable, shaped by the
//! ellipses it sits under:
//!
//! - pattern `(_ x)` matching `(m 5)` gives `x: Direct(5)`
//! - pattern `(_ x ...)` matching `(m 1 2)` gives `x: Repeated[Direct(1), Direct(2)]`
//! - pattern `(_ (x ...) ...)` nests one `Repeated` per ellipsis
//!
//! Every other identifier in the template is renamed afresh on each use, and
//! the new name resolves where the transformer was defined.
use std::collections::HashMap;

use crate::{
    compiler::environment::{Binding as EnvBinding, Environment, WeakEnvironment},
    world::{symbol::Symbol, value::Value},
};

use super::ExpandError;

#[derive(Debug, Clone)]
enum Binding {
    Direct(Value),
    Repeated(Vec<Binding>),
}

type Bindings = HashMap<Symbol, Binding>;

/// A parsed `syntax-rules` form
#[derive(Debug)]
pub struct SyntaxRules {
    // `None` when the ellipsis identifier was itself declared a literal
    ellipsis: Option<Symbol>,
    literals: Vec<Symbol>,
    rules: Vec<Rule>,
    definition: WeakEnvironment,
}

#[derive(Debug)]
struct Rule {
    // the pattern without its leading keyword position
    pattern: Value,
    template: Value,
}

fn wildcard() -> Symbol {
    Symbol::intern("_")
}

// fresh names for the identifiers one use of a macro inserts
struct Renamer<'a> {
    env: &'a Environment,
    definition: &'a WeakEnvironment,
    renamed: HashMap<Symbol, Symbol>,
}

impl Renamer<'_> {
    fn rename(&mut self, symbol: Symbol) -> Symbol {
        *self
            .renamed
            .entry(symbol)
            .or_insert_with(|| self.env.rename(symbol, self.definition))
    }
}

fn symbol_list(list: &Value) -> Option<Vec<Symbol>> {
    list.proper_list()?
        .iter()
        .map(Value::as_symbol)
        .collect()
}

impl SyntaxRules {
    /// Parses `(syntax-rules [ellipsis] (literal ...) (pattern template) ...)`
    /// written in `env`.
    pub fn parse(spec: &Value, env: &Environment) -> Result<Self, ExpandError> {
        let ill_formed = || ExpandError::IllFormed {
            keyword: "syntax-rules".into(),
            form: spec.to_string(),
        };
        let parts = spec.proper_list().ok_or_else(ill_formed)?;
        let (ellipsis, literals, rules) = match parts.as_slice() {
            [_, Value::Symbol(ellipsis), literals, rules @ ..] => (*ellipsis, literals, rules),
            [_, literals, rules @ ..] => (Symbol::intern("..."), literals, rules),
            _ => return Err(ill_formed()),
        };
        let literals =
            symbol_list(literals).ok_or_else(|| ExpandError::BadLiterals(literals.to_string()))?;
        let ellipsis = (!literals.contains(&ellipsis)).then_some(ellipsis);

        let rules = rules
            .iter()
            .map(|rule| match rule.proper_list().as_deref() {
                Some([Value::Pair(pattern), template]) => Ok(Rule {
                    pattern: pattern.cdr(),
                    template: template.clone(),
                }),
                _ => Err(ill_formed()),
            })
            .collect::<Result<_, _>>()?;

        Ok(Self {
            ellipsis,
            literals,
            rules,
            definition: env.downgrade(),
        })
    }

    // a transformer written by another macro sees its ellipsis renamed
    fn is_ellipsis(&self, value: &Value) -> bool {
        matches!((value, self.ellipsis), (Value::Symbol(s), Some(e)) if s.base() == e.base())
    }

    fn is_wildcard(&self, symbol: Symbol) -> bool {
        symbol.base() == wildcard() && !self.literals.iter().any(|literal| literal.base() == wildcard())
    }

    /// Rewrites one use of this macro. No matching rule is an ill-formed form.
    pub fn transform(&self, keyword: Symbol, form: &Value, env: &Environment) -> Result<Value, ExpandError> {
        let input = form.cdr().unwrap_or_default();
        for rule in &self.rules {
            let mut bindings = Bindings::new();
            if self.matches(&rule.pattern, &input, env, &mut bindings) {
                let mut renamer = Renamer {
                    env,
                    definition: &self.definition,
                    renamed: HashMap::new(),
                };
                let output = self.instantiate(&rule.template, &bindings, &mut renamer)?;
                tracing::trace!(keyword = %keyword, renamed = renamer.renamed.len(), "transformed macro use");
                return Ok(output);
            }
        }
        Err(ExpandError::IllFormed {
            keyword: keyword.to_string(),
            form: form.to_string(),
        })
    }

    fn matches(&self, pattern: &Value, input: &Value, env: &Environment, bindings: &mut Bindings) -> bool {
        match pattern {
            Value::Symbol(symbol) if self.is_wildcard(*symbol) => true,
            Value::Symbol(symbol) if self.literals.contains(symbol) => {
                // a literal only matches its own name, and only while that is not a variable
                input.as_symbol().is_some_and(|input| {
                    input.base() == symbol.base() && !matches!(env.lookup(input), Some(EnvBinding::Variable(_)))
                })
            }
            Value::Symbol(symbol) => {
                bindings.insert(*symbol, Binding::Direct(input.clone()));
                true
            }
            Value::Pair(_) => self.matches_list(pattern, input, env, bindings),
            Value::Vector(items) => {
                let Value::Vector(inputs) = input else {
                    return false;
                };
                let pattern = Value::list(items.borrow().iter().cloned());
                let input = Value::list(inputs.borrow().iter().cloned());
                self.matches_list(&pattern, &input, env, bindings)
            }
            Value::Nil => matches!(input, Value::Nil),
            datum => datum.equal(input),
        }
    }

    fn matches_list(&self, pattern: &Value, input: &Value, env: &Environment, bindings: &mut Bindings) -> bool {
        let Some((items, tail)) = pattern.list_parts() else {
            return false;
        };
        let Some(position) = items.windows(2).position(|w| self.is_ellipsis(&w[1])) else {
            // no ellipsis: walk the input pair by pair, the pattern tail takes the rest
            let mut input = input.clone();
            for item in &items {
                let Value::Pair(pair) = &input else {
                    return false;
                };
                if !self.matches(item, &pair.car(), env, bindings) {
                    return false;
                }
                let next = pair.cdr();
                input = next;
            }
            return self.matches(&tail, &input, env, bindings);
        };

        let (before, repeated, after) = (&items[..position], &items[position], &items[position + 2..]);
        let Some((inputs, input_tail)) = input.list_parts() else {
            return false;
        };
        if matches!(tail, Value::Nil) && !matches!(input_tail, Value::Nil) {
            return false;
        }
        let Some(count) = inputs.len().checked_sub(before.len() + after.len()) else {
            return false;
        };

        let matched_before = before
            .iter()
            .zip(&inputs)
            .all(|(p, i)| self.matches(p, i, env, bindings));
        if !matched_before {
            return false;
        }

        let mut iterations: Vec<Bindings> = Vec::with_capacity(count);
        for input in &inputs[before.len()..before.len() + count] {
            let mut inner = Bindings::new();
            if !self.matches(repeated, input, env, &mut inner) {
                return false;
            }
            iterations.push(inner);
        }
        for variable in self.pattern_variables(repeated) {
            let elements = iterations
                .iter_mut()
                .filter_map(|iteration| iteration.remove(&variable))
                .collect();
            bindings.insert(variable, Binding::Repeated(elements));
        }

        let matched_after = after
            .iter()
            .zip(&inputs[before.len() + count..])
            .all(|(p, i)| self.matches(p, i, env, bindings));
        matched_after && (matches!(tail, Value::Nil) || self.matches(&tail, &input_tail, env, bindings))
    }

    fn pattern_variables(&self, pattern: &Value) -> Vec<Symbol> {
        let mut variables = vec![];
        self.collect_pattern_variables(pattern, &mut variables);
        variables
    }

    fn collect_pattern_variables(&self, pattern: &Value, variables: &mut Vec<Symbol>) {
        match pattern {
            Value::Symbol(symbol) => {
                if !self.is_wildcard(*symbol) && !self.literals.contains(symbol) && !self.is_ellipsis(pattern) {
                    variables.push(*symbol);
                }
            }
            Value::Pair(_) => {
                if let Some((items, tail)) = pattern.list_parts() {
                    for item in items.iter().chain(std::iter::once(&tail)) {
                        self.collect_pattern_variables(item, variables);
                    }
                }
            }
            Value::Vector(items) => {
                for item in items.borrow().iter() {
                    self.collect_pattern_variables(item, variables);
                }
            }
            _ => {}
        }
    }

    fn instantiate(&self, template: &Value, bindings: &Bindings, renamer: &mut Renamer) -> Result<Value, ExpandError> {
        self.instantiate_with(template, bindings, false, renamer)
    }

    // `escaped` is set inside `(... template)`, where ellipses are plain symbols
    fn instantiate_with(
        &self,
        template: &Value,
        bindings: &Bindings,
        escaped: bool,
        renamer: &mut Renamer,
    ) -> Result<Value, ExpandError> {
        match template {
            Value::Symbol(symbol) => match bindings.get(symbol) {
                Some(Binding::Direct(value)) => Ok(value.clone()),
                Some(Binding::Repeated(_)) => Err(ExpandError::EllipsisDepth {
                    variable: symbol.to_string(),
                }),
                None => Ok(Value::Symbol(renamer.rename(*symbol))),
            },
            Value::Pair(pair) => {
                if !escaped && self.is_ellipsis(&pair.car()) {
                    return match pair.cdr().proper_list().as_deref() {
                        Some([inner]) => self.instantiate_with(inner, bindings, true, renamer),
                        _ => Err(ExpandError::IllFormed {
                            keyword: "...".into(),
                            form: template.to_string(),
                        }),
                    };
                }
                self.instantiate_list(template, bindings, escaped, renamer)
            }
            Value::Vector(items) => {
                let list = Value::list(items.borrow().iter().cloned());
                let expanded = self.instantiate_list(&list, bindings, escaped, renamer)?;
                Ok(Value::vector(expanded.proper_list().unwrap_or_default()))
            }
            other => Ok(other.clone()),
        }
    }

    fn instantiate_list(
        &self,
        template: &Value,
        bindings: &Bindings,
        escaped: bool,
        renamer: &mut Renamer,
    ) -> Result<Value, ExpandError> {
        let mut output = vec![];
        let mut cursor = template.clone();
        while let Value::Pair(pair) = &cursor {
            let element = pair.car();
            let mut next = pair.cdr();
            let mut depth = 0;
            while !escaped && next.car().is_some_and(|item| self.is_ellipsis(&item)) {
                depth += 1;
                next = next.cdr().unwrap_or_default();
            }
            if depth == 0 {
                output.push(self.instantiate_with(&element, bindings, escaped, renamer)?);
            } else {
                output.extend(self.instantiate_repeated(&element, depth, bindings, renamer)?);
            }
            cursor = next;
        }
        let tail = self.instantiate_with(&cursor, bindings, escaped, renamer)?;
        Ok(Value::list_with_tail(output, tail))
    }

    fn instantiate_repeated(
        &self,
        element: &Value,
        depth: usize,
        bindings: &Bindings,
        renamer: &mut Renamer,
    ) -> Result<Vec<Value>, ExpandError> {
        let mut variables = vec![];
        self.collect_template_variables(element, bindings, &mut variables);

        let mut count: Option<usize> = None;
        for variable in &variables {
            if let Some(Binding::Repeated(elements)) = bindings.get(variable) {
                match count {
                    Some(count) if count != elements.len() => {
                        return Err(ExpandError::EllipsisMismatch {
                            variable: variable.to_string(),
                        })
                    }
                    _ => count = Some(elements.len()),
                }
            }
        }
        let Some(count) = count else {
            return Err(ExpandError::EllipsisDepth {
                variable: element.to_string(),
            });
        };

        let mut output = Vec::with_capacity(count);
        for index in 0..count {
            let mut iteration = bindings.clone();
            for variable in &variables {
                if let Some(Binding::Repeated(elements)) = bindings.get(variable) {
                    if let Some(binding) = elements.get(index) {
                        iteration.insert(*variable, binding.clone());
                    }
                }
            }
            if depth > 1 {
                output.extend(self.instantiate_repeated(element, depth - 1, &iteration, renamer)?);
            } else {
                output.push(self.instantiate(element, &iteration, renamer)?);
            }
        }
        Ok(output)
    }

    // pattern variables a template refers to
    fn collect_template_variables(&self, template: &Value, bindings: &Bindings, variables: &mut Vec<Symbol>) {
        let mut stack = vec![template.clone()];
        while let Some(template) = stack.pop() {
            match &template {
                Value::Symbol(symbol) if bindings.contains_key(symbol) => {
                    if !variables.contains(symbol) {
                        variables.push(*symbol);
                    }
                }
                Value::Pair(pair) => {
                    stack.push(pair.car());
                    stack.push(pair.cdr());
                }
                Value::Vector(items) => stack.extend(items.borrow().iter().cloned()),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::SyntaxRules;
    use crate::{
        compiler::environment::Environment,
        expander::ExpandError,
        reader::parse,
        world::{self, symbol::Symbol, value::Value},
    };

    fn datum(text: &str) -> Value {
        let_assert!(Ok(mut program) = parse(text));
        program.remove(0)
    }

    fn transform(rules: &str, form: &str) -> Result<String, ExpandError> {
        let_assert!(Ok(()) = world::initialize());
        let env = Environment::new();
        let rules = SyntaxRules::parse(&datum(rules), &env)?;
        let output = rules.transform(Symbol::intern("m"), &datum(form), &env)?;
        Ok(output.to_string())
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = "(syntax-rules () ((_) none) ((_ a) (one a)) ((_ a b) (two a b)))";
        check!(transform(rules, "(m)").ok().as_deref() == Some("none"));
        check!(transform(rules, "(m 1)").ok().as_deref() == Some("(one 1)"));
        check!(transform(rules, "(m 1 2)").ok().as_deref() == Some("(two 1 2)"));
        let_assert!(Err(ExpandError::IllFormed { .. }) = transform(rules, "(m 1 2 3)"));
    }

    #[test]
    fn ellipsis_patterns() {
        let rules = "(syntax-rules () ((_ (a b ...) ... last) (list (a . (b ...)) ... last)))";
        check!(
            transform(rules, "(m (1 2 3) (4) 5)").ok().as_deref()
                == Some("(list (1 2 3) (4) 5)")
        );
        let flatten = "(syntax-rules () ((_ (a ...) ...) (a ... ...)))";
        check!(transform(flatten, "(m (1 2) () (3))").ok().as_deref() == Some("(1 2 3)"));
        let dotted = "(syntax-rules () ((_ a ... . rest) (rest a ...)))";
        check!(transform(dotted, "(m 1 2 . 3)").ok().as_deref() == Some("(3 1 2)"));
    }

    #[test]
    fn mismatched_ellipsis_counts_fail() {
        let rules = "(syntax-rules () ((_ (a ...) (b ...)) ((a b) ...)))";
        check!(transform(rules, "(m (1 2) (3 4))").ok().as_deref() == Some("((1 3) (2 4))"));
        let_assert!(Err(ExpandError::EllipsisMismatch { .. }) = transform(rules, "(m (1 2) (3))"));
    }

    #[test]
    fn literals_wildcards_and_escapes() {
        let rules = "(syntax-rules (=>) ((_ a => b) (b a)) ((_ _ c) (c)))";
        check!(transform(rules, "(m 1 => f)").ok().as_deref() == Some("(f 1)"));
        check!(transform(rules, "(m 1 g)").ok().as_deref() == Some("(g)"));
        let escaped = "(syntax-rules () ((_ a) (a (... ...))))";
        check!(transform(escaped, "(m x)").ok().as_deref() == Some("(x ...)"));
        let custom = "(syntax-rules ::: () ((_ a :::) (a ::: ...)))";
        check!(transform(custom, "(m 1 2)").ok().as_deref() == Some("(1 2 ...)"));
        let vectors = "(syntax-rules () ((_ #(a ...)) (quote (a ...))))";
        check!(transform(vectors, "(m #(1 2))").ok().as_deref() == Some("(quote (1 2))"));
        let_assert!(
            Err(ExpandError::BadLiterals(_)) = SyntaxRules::parse(&datum("(syntax-rules (1) ((_) 1))"), &Environment::new())
        );
    }

    #[test]
    fn inserted_identifiers_are_renamed_per_use() {
        let_assert!(Ok(()) = world::initialize());
        let env = Environment::new();
        let rules = "(syntax-rules () ((_ v) (let ((tmp v)) tmp)))";
        let_assert!(Ok(rules) = SyntaxRules::parse(&datum(rules), &env));
        let use_site = env.child();
        let_assert!(Ok(first) = rules.transform(Symbol::intern("m"), &datum("(m tmp)"), &use_site));
        let_assert!(Ok(second) = rules.transform(Symbol::intern("m"), &datum("(m tmp)"), &use_site));

        // (let ((tmp v)) tmp): both inserted `tmp`s are one identifier, the user's is untouched
        let_assert!(Some(parts) = first.proper_list());
        let_assert!([Value::Symbol(keyword), bindings, Value::Symbol(body)] = parts.as_slice());
        check!(keyword.is_generated());
        let_assert!(Some(binding) = bindings.car().and_then(|binding| binding.proper_list()));
        let_assert!([Value::Symbol(binder), Value::Symbol(user)] = binding.as_slice());
        check!(binder == body);
        check!(binder.is_generated());
        check!(!user.is_generated());

        let_assert!(Some(Value::Symbol(second_keyword)) = second.car());
        check!(second_keyword != *keyword);
        check!(first.to_string() == "(let ((tmp tmp)) tmp)");
    }

    #[test]
    fn literals_match_renamed_uses() {
        let_assert!(Ok(()) = world::initialize());
        let env = Environment::new();
        let_assert!(Ok(rules) = SyntaxRules::parse(&datum("(syntax-rules (else) ((_ else) yes) ((_ x) no))"), &env));
        let renamed = env.rename(Symbol::intern("else"), &env.downgrade());
        let form = Value::list([Value::symbol("m"), Value::Symbol(renamed)]);
        let_assert!(Ok(output) = rules.transform(Symbol::intern("m"), &form, &env));
        check!(output.to_string() == "yes");

        // a local variable named `else` is not the literal
        let scope = env.child();
        scope.declare(Symbol::intern("else"));
        let_assert!(Ok(output) = rules.transform(Symbol::intern("m"), &datum("(m else)"), &scope));
        check!(output.to_string() == "no");
    }
}
