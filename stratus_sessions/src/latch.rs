use std::sync::atomic::{AtomicBool, Ordering};

/// Records that the provider has rejected the underlying credential
///
/// Every supplier cell that depends on the same credential shares one latch.
/// Once tripped it stays tripped for the life of the process: a credential
/// proven invalid is never presented to the provider again, no matter how
/// many callers keep asking for a session.
#[derive(Debug, Default)]
pub struct AuthFailureLatch {
    tripped: AtomicBool,
}

impl AuthFailureLatch {
    /// Constructs an untripped latch
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the latch
    ///
    /// Returns `true` only for the call that performed the transition from
    /// unset to set.
    pub fn try_set(&self) -> bool {
        !self.tripped.swap(true, Ordering::AcqRel)
    }

    /// Whether an authorization failure has been recorded
    pub fn is_set(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_first_set_reports_the_transition() {
        let latch = AuthFailureLatch::new();
        assert!(!latch.is_set());
        assert!(latch.try_set());
        assert!(latch.is_set());
        assert!(!latch.try_set());
        assert!(latch.is_set());
    }
}
