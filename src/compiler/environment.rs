use core::fmt;
use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::{Rc, Weak},
};

use crate::{
    expander::Syntax,
    world::{self, symbol::Symbol, value::Value},
};

/// Environments define the context for execution, with variable mappings,
/// macro definitions, and up to 1 reference to a parent environment.
///
/// The two namespaces of one frame are disjoint: defining a name as a variable
/// forgets any syntax binding for it in that frame, and the other way around.
/// Below the root frame sits the process-wide builtin table (see [`world`]).
///
/// During expansion, frames also record the run-time names of local binders,
/// and where identifiers inserted by macro templates came from. See [`Environment::declare`] and
/// [`Environment::rename`].
///
/// Cloning is cheap and shares the frame.
#[derive(Clone)]
pub struct Environment(Rc<Frame>);

struct Frame {
    parent: Option<Environment>,
    variables: RefCell<HashMap<Symbol, Value>>,
    syntax: RefCell<HashMap<Symbol, Syntax>>,
    // identifier -> the name it is bound under at run time
    aliases: RefCell<HashMap<Symbol, Symbol>>,
    // identifiers inserted by macro uses expanded in this frame
    origins: RefCell<HashMap<Symbol, Origin>>,
    // only used on the root frame
    generated: Cell<u32>,
}

/// Where a renamed template identifier came from
#[derive(Clone)]
struct Origin {
    source: Symbol,
    definition: WeakEnvironment,
}

/// An environment that is not kept alive by this reference
#[derive(Clone)]
pub struct WeakEnvironment(Weak<Frame>);

impl fmt::Debug for WeakEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<weak environment {:p}>", self.0.as_ptr())
    }
}

impl WeakEnvironment {
    pub fn upgrade(&self) -> Option<Environment> {
        self.0.upgrade().map(Environment)
    }
}

/// What a name resolves to
#[derive(Clone)]
pub enum Binding {
    /// A variable, with the name it has at run time
    Variable(Symbol),
    Syntax(Syntax),
}

impl Environment {
    /// A fresh root environment
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<Environment>) -> Self {
        Self(Rc::new(Frame {
            parent,
            variables: RefCell::default(),
            syntax: RefCell::default(),
            aliases: RefCell::default(),
            origins: RefCell::default(),
            generated: Cell::new(0),
        }))
    }

    /// A new, empty frame whose parent is this one
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    pub fn parent(&self) -> Option<&Environment> {
        self.0.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.0.parent.is_none()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakEnvironment {
        WeakEnvironment(Rc::downgrade(&self.0))
    }

    fn root(&self) -> &Environment {
        let mut env = self;
        while let Some(parent) = env.parent() {
            env = parent;
        }
        env
    }

    fn frames(&self) -> impl Iterator<Item = &Environment> {
        std::iter::successors(Some(self), |&env| env.parent())
    }

    /// Binds `name` in this frame, replacing whatever was there.
    pub fn define(&self, name: Symbol, value: Value) {
        self.0.syntax.borrow_mut().remove(&name);
        let _old = self.0.variables.borrow_mut().insert(name, value);
    }

    /// Makes `name` a variable of this frame without assigning it.
    ///
    /// An existing binding in this frame is left alone. On the root frame a
    /// builtin procedure keeps its value, so `(define car car)` stays meaningful.
    pub fn reserve(&self, name: Symbol) {
        self.0.syntax.borrow_mut().remove(&name);
        self.0.aliases.borrow_mut().remove(&name);
        if self.0.variables.borrow().contains_key(&name) {
            return;
        }
        let initial = if self.is_root() {
            world::builtin(name).unwrap_or(Value::Undefined)
        } else {
            Value::Undefined
        };
        self.0.variables.borrow_mut().insert(name, initial);
    }

    /// Assigns to the nearest binding of `name`. Returns false if it is unbound.
    ///
    /// Assigning to a builtin creates a binding in the root frame, leaving the
    /// builtin table untouched.
    pub fn set(&self, name: Symbol, value: Value) -> bool {
        for env in self.frames() {
            if let Some(slot) = env.0.variables.borrow_mut().get_mut(&name) {
                let _old = std::mem::replace(slot, value);
                return true;
            }
        }
        if world::builtin(name).is_some() {
            self.root().define(name, value);
            return true;
        }
        false
    }

    /// The value of the nearest binding of `name`
    pub fn get(&self, name: Symbol) -> Option<Value> {
        self.frames()
            .find_map(|env| env.0.variables.borrow().get(&name).cloned())
            .or_else(|| world::builtin(name))
    }

    /// Binds `name` as a variable of this frame during expansion, returning
    /// the name the variable has at run time.
    ///
    /// The root keeps interned names, so programs can refer to their globals.
    /// Every other frame gives its binders fresh names, so a local variable is
    /// only reachable through identifiers that resolve to it here. Declaring
    /// the same identifier twice in one frame gives the same name.
    pub fn declare(&self, name: Symbol) -> Symbol {
        if self.is_root() {
            let global = name.base();
            self.reserve(global);
            return global;
        }
        self.0.syntax.borrow_mut().remove(&name);
        let existing = self.0.aliases.borrow().get(&name).copied();
        existing.unwrap_or_else(|| {
            let runtime = self.generate(name);
            self.0.aliases.borrow_mut().insert(name, runtime);
            runtime
        })
    }

    /// A fresh identifier standing for `source` as written in a macro template.
    ///
    /// Unless a binder inside the expansion captures it, it resolves the way
    /// `source` does in `definition`, whatever the use site binds.
    pub fn rename(&self, source: Symbol, definition: &WeakEnvironment) -> Symbol {
        let renamed = self.generate(source);
        let origin = Origin {
            source,
            definition: definition.clone(),
        };
        self.0.origins.borrow_mut().insert(renamed, origin);
        renamed
    }

    pub fn define_syntax(&self, name: Symbol, syntax: Syntax) {
        self.0.variables.borrow_mut().remove(&name);
        self.0.aliases.borrow_mut().remove(&name);
        let _old = self.0.syntax.borrow_mut().insert(name, syntax);
    }

    pub fn get_syntax(&self, name: Symbol) -> Option<Syntax> {
        match self.lookup(name)? {
            Binding::Syntax(syntax) => Some(syntax),
            Binding::Variable(_) => None,
        }
    }

    /// Resolves `name`: the innermost frame binding it wins, then the builtins.
    ///
    /// An identifier renamed by a macro use that nothing in between binds is
    /// resolved where its macro was defined. If that environment is gone (the
    /// prelude's scratch environment, say) only the builtins are consulted.
    pub fn lookup(&self, name: Symbol) -> Option<Binding> {
        for env in self.frames() {
            if let Some(runtime) = env.0.aliases.borrow().get(&name) {
                return Some(Binding::Variable(*runtime));
            }
            if env.0.variables.borrow().contains_key(&name) {
                return Some(Binding::Variable(name));
            }
            if let Some(syntax) = env.0.syntax.borrow().get(&name) {
                return Some(Binding::Syntax(syntax.clone()));
            }
            let origin = env.0.origins.borrow().get(&name).cloned();
            if let Some(origin) = origin {
                return match origin.definition.upgrade() {
                    Some(definition) => definition.lookup(origin.source),
                    None => builtin_binding(origin.source.base()),
                };
            }
        }
        builtin_binding(name)
    }

    /// A symbol named after `base` that no other symbol is equal to
    pub fn generate(&self, base: Symbol) -> Symbol {
        let counter = &self.root().0.generated;
        let tag = counter.get().wrapping_add(1).max(1);
        counter.set(tag);
        Symbol::generated(base.base(), tag)
    }

    /// Removes and returns every syntax binding of this frame.
    pub fn take_syntax(&self) -> HashMap<Symbol, Syntax> {
        std::mem::take(&mut *self.0.syntax.borrow_mut())
    }
}

fn builtin_binding(name: Symbol) -> Option<Binding> {
    if world::builtin(name).is_some() {
        Some(Binding::Variable(name))
    } else {
        world::builtin_syntax(name).map(Binding::Syntax)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<environment {:p}>", Rc::as_ptr(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::{Binding, Environment};
    use crate::world::{self, symbol::Symbol, value::Value};

    #[test]
    fn frames_shadow_their_parents() {
        let x = Symbol::intern("x");
        let root = Environment::new();
        root.define(x, Value::number(1i64));
        let inner = root.child();
        inner.define(x, Value::number(2i64));
        let_assert!(Some(Value::Number(n)) = inner.get(x));
        check!(n.to_i64() == Some(2));
        let_assert!(Some(Value::Number(n)) = root.get(x));
        check!(n.to_i64() == Some(1));

        check!(inner.set(x, Value::number(3i64)));
        let_assert!(Some(Value::Number(n)) = root.get(x));
        check!(n.to_i64() == Some(1));
        check!(!inner.set(Symbol::intern("nowhere"), Value::Nil));
    }

    #[test]
    fn reserve_leaves_existing_bindings() {
        let_assert!(Ok(()) = world::initialize());
        let root = Environment::new();
        let y = Symbol::intern("y");
        root.define(y, Value::Boolean(true));
        root.reserve(y);
        let_assert!(Some(Value::Boolean(true)) = root.get(y));

        let car = Symbol::intern("car");
        root.reserve(car);
        let_assert!(Some(Value::Procedure(_)) = root.get(car));
        let inner = root.child();
        inner.reserve(car);
        let_assert!(Some(Value::Undefined) = inner.get(car));
    }

    #[test]
    fn namespaces_are_disjoint() {
        let_assert!(Ok(()) = world::initialize());
        let env = Environment::new();
        let name = Symbol::intern("if");
        let_assert!(Some(Binding::Syntax(_)) = env.lookup(name));
        env.reserve(name);
        let_assert!(Some(Binding::Variable(_)) = env.lookup(name));
        let_assert!(Some(syntax) = world::builtin_syntax(Symbol::intern("lambda")));
        env.define_syntax(name, syntax);
        let_assert!(Some(Binding::Syntax(_)) = env.lookup(name));
        check!(env.get(name).is_none());
    }

    #[test]
    fn generated_symbols_differ() {
        let env = Environment::new().child();
        let base = Symbol::intern("tmp");
        let a = env.generate(base);
        let b = env.generate(base);
        check!(a != b);
        check!(a.base() == base);
    }

    #[test]
    fn local_binders_get_fresh_names() {
        let_assert!(Ok(()) = world::initialize());
        let root = Environment::new();
        let x = Symbol::intern("x");
        check!(root.declare(x) == x);

        let inner = root.child();
        let local = inner.declare(x);
        check!(local != x);
        check!(local.base() == x);
        check!(inner.declare(x) == local);
        let_assert!(Some(Binding::Variable(runtime)) = inner.lookup(x));
        check!(runtime == local);
        let_assert!(Some(Binding::Variable(runtime)) = root.lookup(x));
        check!(runtime == x);
    }

    #[test]
    fn renamed_identifiers_resolve_where_defined() {
        let_assert!(Ok(()) = world::initialize());
        let x = Symbol::intern("x");
        let definition = Environment::new().child();
        let outer = definition.declare(x);

        // the use site shadows `x`, the renamed identifier still sees the outer one
        let usage = definition.child();
        let shadow = usage.declare(x);
        let renamed = usage.rename(x, &definition.downgrade());
        let_assert!(Some(Binding::Variable(runtime)) = usage.lookup(renamed));
        check!(runtime == outer);
        check!(runtime != shadow);

        // a binder inside the expansion captures it
        let body = usage.child();
        let captured = body.declare(renamed);
        let_assert!(Some(Binding::Variable(runtime)) = body.lookup(renamed));
        check!(runtime == captured);

        // once the defining environment is gone only builtins are left
        let orphan = Environment::new().child();
        let car = orphan.rename(Symbol::intern("car"), &Environment::new().downgrade());
        let_assert!(Some(Binding::Variable(runtime)) = orphan.lookup(car));
        check!(runtime == Symbol::intern("car"));
        let lost = orphan.rename(x, &Environment::new().downgrade());
        check!(orphan.lookup(lost).is_none());
    }
}
