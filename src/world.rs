//! A World is the process-wide state every program shares: the symbol interner and
//! the builtin table sitting beneath every root [`Environment`].
//!
//! Both are thread-local, so tests running on separate threads never see each other's
//! definitions. The builtin table is filled in a fixed order by [`initialize`]:
//! primitive syntax first (nothing can be expanded without it), then the builtin
//! procedures, then the prelude's derived syntax, which is expanded using the first two.

use std::{cell::RefCell, collections::HashMap};

use crate::{
    compiler::environment::Environment,
    expander::{self, Syntax},
    reader,
    runtime::{scheme_base, Procedure},
    Error,
};

use self::{symbol::Symbol, value::Value};

pub mod fuel;
pub mod symbol;
pub mod value;

const PRELUDE: &str = include_str!("world/prelude.scm");

thread_local! {
    static RODEO: RefCell<lasso::Rodeo> = RefCell::new(lasso::Rodeo::default());
    static BUILTINS: RefCell<Option<BuiltinTable>> = const { RefCell::new(None) };
}

/// Bindings visible from every environment, below all user frames
#[derive(Default)]
struct BuiltinTable {
    variables: HashMap<Symbol, Value>,
    syntax: HashMap<Symbol, Syntax>,
}

pub(crate) fn with_interner<T>(func: impl FnOnce(&mut lasso::Rodeo) -> T) -> T {
    RODEO.with_borrow_mut(func)
}

/// Fills the builtin table if it is empty. Calling it again is a no-op.
pub fn initialize() -> Result<(), Error> {
    if is_initialized() {
        return Ok(());
    }

    let mut table = BuiltinTable::default();
    for (name, primitive) in expander::PRIMITIVES {
        table
            .syntax
            .insert(Symbol::intern(name), Syntax::Primitive(*primitive));
    }
    for builtin in scheme_base::builtins() {
        let value = Value::Procedure(Procedure::Builtin(builtin));
        for name in std::iter::once(&builtin.name).chain(builtin.aliases) {
            table.variables.insert(Symbol::intern(name), value.clone());
        }
    }
    for (name, procedure) in scheme_base::assembled() {
        table.variables.insert(Symbol::intern(name), procedure);
    }
    let procedures = table.variables.len();
    BUILTINS.set(Some(table));

    let scratch = Environment::new();
    for datum in reader::parse(PRELUDE)? {
        expander::expand_toplevel(&datum, &scratch)?;
    }
    let derived = scratch.take_syntax();
    let derived_count = derived.len();
    BUILTINS.with_borrow_mut(|table| {
        if let Some(table) = table {
            table.syntax.extend(derived);
        }
    });

    tracing::debug!(procedures, derived = derived_count, "world initialized");
    Ok(())
}

pub fn is_initialized() -> bool {
    BUILTINS.with_borrow(Option::is_some)
}

/// Drops the builtin table; the next [`initialize`] rebuilds it from scratch.
///
/// Interned symbols survive a reset.
pub fn reset() {
    BUILTINS.set(None);
}

pub(crate) fn builtin(name: Symbol) -> Option<Value> {
    BUILTINS.with_borrow(|table| table.as_ref()?.variables.get(&name).cloned())
}

pub(crate) fn builtin_syntax(name: Symbol) -> Option<Syntax> {
    BUILTINS.with_borrow(|table| table.as_ref()?.syntax.get(&name).cloned())
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::{builtin, builtin_syntax, initialize, is_initialized, reset};
    use crate::world::symbol::Symbol;

    #[test]
    fn initialize_is_idempotent() {
        let_assert!(Ok(()) = initialize());
        let_assert!(Ok(()) = initialize());
        check!(is_initialized());
        check!(builtin(Symbol::intern("car")).is_some());
        check!(builtin(Symbol::intern("call-with-current-continuation")).is_some());
        check!(builtin_syntax(Symbol::intern("lambda")).is_some());
        // derived syntax from the prelude
        check!(builtin_syntax(Symbol::intern("let")).is_some());
        check!(builtin_syntax(Symbol::intern("cond")).is_some());
    }

    #[test]
    fn reset_empties_the_table() {
        let_assert!(Ok(()) = initialize());
        reset();
        check!(!is_initialized());
        check!(builtin(Symbol::intern("car")).is_none());
        let_assert!(Ok(()) = initialize());
        check!(builtin(Symbol::intern("car")).is_some());
    }
}
