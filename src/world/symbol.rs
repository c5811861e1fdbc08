use core::fmt;

use super::with_interner;

/// An identifier. Interned symbols with the same name are the same symbol;
/// generated symbols (made while renaming macro templates) carry a nonzero tag
/// and are only ever equal to themselves.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol {
    key: lasso::Spur,
    tag: u32,
}

impl Symbol {
    pub fn intern(name: &str) -> Self {
        Self {
            key: with_interner(|rodeo| rodeo.get_or_intern(name)),
            tag: 0,
        }
    }

    pub(crate) fn generated(base: Symbol, tag: u32) -> Self {
        Self { key: base.key, tag }
    }

    pub fn is_generated(&self) -> bool {
        self.tag != 0
    }

    /// The interned symbol this one was generated from (itself if interned).
    pub fn base(self) -> Symbol {
        Self {
            key: self.key,
            tag: 0,
        }
    }

    pub fn with_name<T>(&self, func: impl FnOnce(&str) -> T) -> T {
        with_interner(|rodeo| func(rodeo.resolve(&self.key)))
    }

    pub fn name(&self) -> String {
        self.with_name(str::to_owned)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // generated symbols print as their base so macro output stays readable
        f.write_str(&self.name())
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_generated() {
            write!(f, "{}.{}", self.name(), self.tag)
        } else {
            write!(f, "{}", self.name())
        }
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::intern(value)
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::Symbol;

    #[test]
    fn interning_is_identity() {
        check!(Symbol::intern("apple") == Symbol::intern("apple"));
        check!(Symbol::intern("apple") != Symbol::intern("Apple"));
        check!(Symbol::intern("λ").name() == "λ");
    }

    #[test]
    fn generated_symbols_are_fresh() {
        let base = Symbol::intern("x");
        let generated = Symbol::generated(base, 7);
        check!(generated != base);
        check!(generated.base() == base);
        check!(generated.to_string() == "x");
        check!(format!("{generated:?}") == "x.7");
        check!(generated == Symbol::generated(base, 7));
    }
}
