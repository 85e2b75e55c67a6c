/// Admission-control counter for outbound operations within one run.
///
/// Every unit of work that performs one outbound call (DB statement, forum
/// HTTP request, AI request) must pass through [`OpBudget::admit`] before
/// attempting the call. An exhausted budget is not an error: callers skip
/// the work and move on. The terminal status write of a run is never gated
/// here — the ceiling is chosen with headroom for it.
#[derive(Debug, Clone)]
pub struct OpBudget {
    remaining: u32,
    ceiling: u32,
}

impl OpBudget {
    pub fn new(ceiling: u32) -> Self {
        Self {
            remaining: ceiling,
            ceiling,
        }
    }

    /// Consume one unit if available. Returns false without side effects
    /// when the budget is exhausted; the proposed operation must then be
    /// skipped entirely, not attempted.
    pub fn admit(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn consumed(&self) -> u32 {
        self.ceiling - self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_exactly_ceiling_operations() {
        let mut budget = OpBudget::new(3);
        assert!(budget.admit());
        assert!(budget.admit());
        assert!(budget.admit());
        assert!(!budget.admit());
        assert_eq!(budget.remaining(), 0);
        assert_eq!(budget.consumed(), 3);
    }

    #[test]
    fn never_goes_negative_under_repeated_denial() {
        let mut budget = OpBudget::new(1);
        assert!(budget.admit());
        for _ in 0..100 {
            assert!(!budget.admit());
            assert_eq!(budget.remaining(), 0);
        }
    }

    #[test]
    fn zero_ceiling_admits_nothing() {
        let mut budget = OpBudget::new(0);
        assert!(budget.is_exhausted());
        assert!(!budget.admit());
    }
}
