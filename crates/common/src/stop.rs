//! Process-wide stop signal
//!
//! Raised once when the process is asked to shut down. Blocking workers poll
//! it between bounded waits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct Inner {
    raised: AtomicBool,
}

/// Cloneable, one-way stop flag
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Returns `true` for the call that actually raised it.
    pub fn raise(&self) -> bool {
        !self.inner.raised.swap(true, Ordering::SeqCst)
    }

    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_once() {
        let stop = StopSignal::new();
        let clone = stop.clone();
        assert!(!clone.is_raised());
        assert!(stop.raise());
        assert!(!clone.raise());
        assert!(clone.is_raised());
    }
}
