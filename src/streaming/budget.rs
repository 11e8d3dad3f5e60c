//! Byte budget accounting for the chunk cache
//!
//! Tracks resident bytes against a fixed budget and exposes a pressure
//! metric used by eviction and by the performance monitor.

/// Pressure above which the cache counts as under strain
pub const HIGH_PRESSURE: f32 = 0.9;

/// Memory budget tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBudget {
    /// Maximum bytes allowed
    budget_bytes: usize,
    /// Currently accounted bytes
    used_bytes: usize,
}

impl MemoryBudget {
    /// Create a new memory budget
    ///
    /// # Arguments
    /// * `budget_bytes` - Maximum resident bytes
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes, used_bytes: 0 }
    }

    pub fn add(&mut self, bytes: usize) {
        self.used_bytes = self.used_bytes.saturating_add(bytes);
    }

    pub fn remove(&mut self, bytes: usize) {
        self.used_bytes = self.used_bytes.saturating_sub(bytes);
    }

    pub fn used(&self) -> usize {
        self.used_bytes
    }

    pub fn budget(&self) -> usize {
        self.budget_bytes
    }

    pub fn available(&self) -> usize {
        self.budget_bytes.saturating_sub(self.used_bytes)
    }

    /// Used / budget, above 1.0 when over budget
    pub fn pressure(&self) -> f32 {
        if self.budget_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f32 / self.budget_bytes as f32
    }

    pub fn is_over_budget(&self) -> bool {
        self.used_bytes > self.budget_bytes
    }

    /// Whether usage exceeds [`HIGH_PRESSURE`] of the budget
    pub fn should_evict(&self) -> bool {
        self.pressure() > HIGH_PRESSURE
    }

    /// Whether `bytes` more would still fit
    pub fn can_fit(&self, bytes: usize) -> bool {
        self.available() >= bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accounting() {
        let mut budget = MemoryBudget::new(1000);
        budget.add(400);
        assert_eq!(budget.used(), 400);
        assert_eq!(budget.available(), 600);
        assert!(budget.can_fit(600));
        assert!(!budget.can_fit(601));

        budget.remove(100);
        assert_eq!(budget.used(), 300);
        assert!((budget.pressure() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_pressure_thresholds() {
        let mut budget = MemoryBudget::new(1000);
        budget.add(950);
        assert!(budget.should_evict());
        assert!(!budget.is_over_budget());
        budget.add(100);
        assert!(budget.is_over_budget());
        assert!(budget.pressure() > 1.0);
    }

    #[test]
    fn test_saturating_ops() {
        let mut budget = MemoryBudget::new(1000);
        budget.remove(5000);
        assert_eq!(budget.used(), 0);
        budget.add(usize::MAX);
        budget.add(100);
        assert_eq!(budget.used(), usize::MAX);
        assert_eq!(MemoryBudget::new(0).pressure(), 0.0);
    }
}
