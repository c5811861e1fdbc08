//! Fuel for the machine
//!
//! Every executed instruction burns one unit. A run that drains its fuel stops
//! between instructions and can be resumed later with a refill.

#[derive(Debug, Clone)]
pub struct Fuel {
    fuel: i64,
    interrupted: bool,
}

impl Fuel {
    pub fn empty() -> Self {
        Self::with(0)
    }

    pub fn with(fuel: i64) -> Self {
        Self {
            fuel,
            interrupted: false,
        }
    }

    /// Effectively unbounded fuel, for running programs to completion.
    pub fn unlimited() -> Self {
        Self::with(i64::MAX)
    }

    /// Refills fuel up to a given maximum and clears the interrupt flag.
    ///
    /// Meant to be called between runs by a loop that re-uses one fuel container.
    pub fn refill(&mut self, fuel: i64, max_fuel: i64) {
        self.fuel = self.fuel.saturating_add(fuel).min(max_fuel);
        self.interrupted = false;
    }

    pub fn consume(&mut self, fuel: i64) {
        self.fuel = self.fuel.saturating_sub(fuel);
    }

    pub fn remaining(&self) -> i64 {
        self.fuel
    }

    /// Asks the running machine to stop at the next instruction boundary
    /// without burning any fuel.
    pub fn interrupt(&mut self) {
        self.interrupted = true;
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// Returns true if we have positive fuel remaining *and* we have not been interrupted.
    pub fn should_continue(&self) -> bool {
        self.fuel > 0 && !self.interrupted
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::Fuel;

    #[test]
    fn refill_is_capped() {
        let mut fuel = Fuel::with(5);
        fuel.consume(3);
        check!(fuel.remaining() == 2);
        fuel.refill(100, 10);
        check!(fuel.remaining() == 10);
        fuel.interrupt();
        check!(!fuel.should_continue());
        fuel.refill(0, 10);
        check!(fuel.should_continue());
        fuel.consume(20);
        check!(!fuel.should_continue());
    }
}
