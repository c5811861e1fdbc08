//! External representations: the `write` and `display` printers.
//!
//! `write` output reads back as an equal datum. Pair and vector graphs that
//! contain cycles are printed with datum labels (`#0=(a . #0#)`), so printing
//! always terminates; shared but acyclic structure is printed in full.
use core::fmt;
use std::collections::{HashMap, HashSet};

use crate::{
    lexer::NAMED_CHARACTERS,
    runtime::Procedure,
    world::{symbol::Symbol, value::Value},
};

/// Prints a value the way `write` does
pub struct Written<'v>(pub &'v Value);

/// Prints a value the way `display` does
pub struct Displayed<'v>(pub &'v Value);

impl fmt::Display for Written<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Printer::new(self.0, false).print(self.0, f)
    }
}

impl fmt::Display for Displayed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Printer::new(self.0, true).print(self.0, f)
    }
}

type NodeId = *const ();

fn node_id(value: &Value) -> Option<NodeId> {
    match value {
        Value::Pair(pair) => Some(std::rc::Rc::as_ptr(pair) as NodeId),
        Value::Vector(items) => Some(std::rc::Rc::as_ptr(items) as NodeId),
        _ => None,
    }
}

fn children(value: &Value) -> Vec<Value> {
    match value {
        Value::Pair(pair) => vec![pair.car(), pair.cdr()],
        Value::Vector(items) => items.borrow().clone(),
        _ => vec![],
    }
}

enum Visit {
    Enter(Value),
    Exit(NodeId),
}

/// Nodes reachable from `root` that are reached again while still being walked
fn cycle_targets(root: &Value) -> HashSet<NodeId> {
    let mut targets = HashSet::new();
    if node_id(root).is_none() {
        return targets;
    }
    let mut finished = HashSet::new();
    let mut walking = HashSet::new();
    let mut stack = vec![Visit::Enter(root.clone())];
    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Enter(value) => {
                let Some(id) = node_id(&value) else {
                    continue;
                };
                if walking.contains(&id) {
                    targets.insert(id);
                } else if !finished.contains(&id) {
                    walking.insert(id);
                    stack.push(Visit::Exit(id));
                    stack.extend(children(&value).into_iter().rev().map(Visit::Enter));
                }
            }
            Visit::Exit(id) => {
                walking.remove(&id);
                finished.insert(id);
            }
        }
    }
    targets
}

struct Printer {
    display: bool,
    targets: HashSet<NodeId>,
    labels: HashMap<NodeId, usize>,
}

impl Printer {
    fn new(root: &Value, display: bool) -> Self {
        Self {
            display,
            targets: cycle_targets(root),
            labels: HashMap::new(),
        }
    }

    // Writes `#n#` for an already labelled node, or `#n=` before a fresh one.
    // Returns true when the node has been fully printed as a reference.
    fn label(&mut self, value: &Value, f: &mut fmt::Formatter<'_>) -> Result<bool, fmt::Error> {
        let Some(id) = node_id(value).filter(|id| self.targets.contains(id)) else {
            return Ok(false);
        };
        if let Some(label) = self.labels.get(&id) {
            write!(f, "#{label}#")?;
            return Ok(true);
        }
        let label = self.labels.len();
        self.labels.insert(id, label);
        write!(f, "#{label}=")?;
        Ok(false)
    }

    fn print(&mut self, value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label(value, f)? {
            return Ok(());
        }
        match value {
            Value::Nil => f.write_str("()"),
            Value::Unspecified => f.write_str("#<unspecified>"),
            Value::Undefined => f.write_str("#<undefined>"),
            Value::Boolean(true) => f.write_str("#t"),
            Value::Boolean(false) => f.write_str("#f"),
            Value::Character(c) if self.display => write!(f, "{c}"),
            Value::Character(c) => write_character(*c, f),
            Value::String(text) if self.display => f.write_str(&text.borrow()),
            Value::String(text) => write_string(&text.borrow(), f),
            Value::Symbol(symbol) if self.display => write!(f, "{symbol}"),
            Value::Symbol(symbol) => write_symbol(*symbol, f),
            Value::Number(number) => write!(f, "{number}"),
            Value::Pair(_) => self.print_list(value, f),
            Value::Vector(items) => {
                f.write_str("#(")?;
                let items = items.borrow().clone();
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" ")?;
                    }
                    self.print(item, f)?;
                }
                f.write_str(")")
            }
            Value::Template(template) => write!(f, "{template}"),
            Value::Procedure(Procedure::Continuation(_)) => f.write_str("#<continuation>"),
            Value::Procedure(procedure) => match procedure.name() {
                Some(name) => write!(f, "#<procedure {name}>"),
                None => f.write_str("#<procedure>"),
            },
            Value::Values(values) => {
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" ")?;
                    }
                    self.print(value, f)?;
                }
                Ok(())
            }
            Value::Environment(env) => write!(f, "{env:?}"),
            Value::Port(port) => write!(f, "{port:?}"),
        }
    }

    fn print_list(&mut self, list: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        let mut cursor = list.clone();
        let mut first = true;
        loop {
            let Value::Pair(pair) = &cursor else {
                break;
            };
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            self.print(&pair.car(), f)?;
            let next = pair.cdr();
            match &next {
                Value::Nil => break,
                Value::Pair(_) if !node_id(&next).is_some_and(|id| self.targets.contains(&id)) => {
                    cursor = next;
                }
                tail => {
                    f.write_str(" . ")?;
                    self.print(tail, f)?;
                    break;
                }
            }
        }
        f.write_str(")")
    }
}

fn write_character(c: char, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let named = NAMED_CHARACTERS
        .iter()
        .filter(|(_, named)| **named == c)
        .map(|(name, _)| *name)
        .min();
    match named {
        Some(name) if !c.is_alphanumeric() || c.is_ascii_control() => write!(f, "#\\{name}"),
        _ if c.is_control() => write!(f, "#\\x{:x}", c as u32),
        _ => write!(f, "#\\{c}"),
    }
}

fn write_string(text: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("\"")?;
    for c in text.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            '\x07' => f.write_str("\\a")?,
            '\x08' => f.write_str("\\b")?,
            '\0' => f.write_str("\\0")?,
            c if c.is_control() => write!(f, "\\x{:x};", c as u32)?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

fn write_symbol(symbol: Symbol, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    symbol.with_name(|name| {
        if is_plain_identifier(name) {
            f.write_str(name)
        } else {
            f.write_str("|")?;
            for c in name.chars() {
                match c {
                    '|' => f.write_str("\\|")?,
                    '\\' => f.write_str("\\\\")?,
                    c => write!(f, "{c}")?,
                }
            }
            f.write_str("|")
        }
    })
}

// Identifiers that read back as the same symbol without pipes
fn is_plain_identifier(name: &str) -> bool {
    const INITIAL: &str = "!$%&*/:<=>?^_~";
    const SUBSEQUENT: &str = "!$%&*/:<=>?^_~+-.@";
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let ordinary = (first.is_alphabetic() || INITIAL.contains(first))
        && chars.all(|c| c.is_alphanumeric() || SUBSEQUENT.contains(c));
    // peculiar identifiers: + - ... and the like, which must not read as numbers
    let peculiar = matches!(first, '+' | '-' | '.')
        && crate::num::Number::parse(name, 10).is_none()
        && name.chars().skip(1).all(|c| c.is_alphanumeric() || SUBSEQUENT.contains(c))
        && (first != '.' || name.len() > 1);
    ordinary || peculiar
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use crate::world::value::Value;

    #[test]
    fn writes_and_displays() {
        let text = Value::string("a \"quoted\"\nline");
        check!(text.write().to_string() == r#""a \"quoted\"\nline""#);
        check!(text.display().to_string() == "a \"quoted\"\nline");
        check!(Value::Character(' ').write().to_string() == r"#\space");
        check!(Value::Character('a').write().to_string() == r"#\a");
        check!(Value::Character('a').display().to_string() == "a");
        check!(Value::symbol("hello world").write().to_string() == "|hello world|");
        check!(Value::symbol("+").write().to_string() == "+");
        check!(Value::symbol("...").write().to_string() == "...");
        check!(Value::symbol("1+").write().to_string() == "|1+|");
        check!(Value::symbol("->x").write().to_string() == "->x");
    }

    #[test]
    fn writes_cycles_with_labels() {
        let list = Value::list([Value::symbol("a"), Value::symbol("b")]);
        if let Some(Value::Pair(last)) = list.cdr() {
            last.set_cdr(list.clone());
        }
        check!(list.write().to_string() == "#0=(a b . #0#)");

        let shared = Value::list([Value::symbol("x")]);
        let twice = Value::list([shared.clone(), shared]);
        check!(twice.write().to_string() == "((x) (x))");

        let vector = Value::vector(vec![Value::Nil]);
        if let Value::Vector(items) = &vector {
            items.borrow_mut()[0] = vector.clone();
        }
        check!(vector.write().to_string() == "#0=#(#0#)");

        // break the cycles so the test does not leak
        if let Value::Pair(head) = &list {
            head.set_cdr(Value::Nil);
        }
        if let Value::Vector(items) = &vector {
            items.borrow_mut().clear();
        }
    }
}
