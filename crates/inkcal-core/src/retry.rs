//! Bounded retry accounting shared by every stage.

/// Iterator over attempt numbers for an operation configured with `retries`
/// retries: `retries + 1` total attempts, numbered from 1.
#[derive(Clone, Copy, Debug)]
pub struct RetryPlan {
    retries: u32,
    attempted: u32,
}

impl RetryPlan {
    pub const fn new(retries: u32) -> Self {
        Self {
            retries,
            attempted: 0,
        }
    }

    /// Total attempts this plan will yield.
    pub const fn total_attempts(&self) -> u32 {
        self.retries + 1
    }
}

impl Iterator for RetryPlan {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.attempted >= self.total_attempts() {
            return None;
        }
        self.attempted += 1;
        Some(self.attempted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_retries_means_four_attempts() {
        let attempts: Vec<u32> = RetryPlan::new(3).collect();
        assert_eq!(attempts, vec![1, 2, 3, 4]);
    }

    #[test]
    fn zero_retries_still_attempts_once() {
        let attempts: Vec<u32> = RetryPlan::new(0).collect();
        assert_eq!(attempts, vec![1]);
    }
}
