//! Cooperative cancellation for long-running engine operations.
//!
//! A [`CancelFlag`] is shared between the engine and whoever drives it (the CLI
//! triggers it on ctrl-c). Operations poll it between tiles, layers, capillaries and
//! frames and stop with [`EngineError::Cancelled`] without touching engine state.
//! A flag triggered between operations cancels the next one. The engine clears the
//! flag once an operation has stopped because of it.

use crate::error::{EngineError, EngineResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Cloneable cancellation flag. All clones observe the same state.
#[derive(Clone, Debug)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
    reason: Arc<RwLock<Option<String>>>,
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelFlag {
    /// Untriggered flag.
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(RwLock::new(None)),
        }
    }

    /// Request cancellation of the running operation.
    pub fn trigger(&self, reason: impl Into<String>) {
        self.flag.store(true, Ordering::SeqCst);
        if let Ok(mut r) = self.reason.write() {
            *r = Some(reason.into());
        }
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Reason given to the last [`CancelFlag::trigger`].
    pub fn reason(&self) -> Option<String> {
        self.reason.read().ok().and_then(|r| r.clone())
    }

    /// Clear the flag and its reason.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
        if let Ok(mut r) = self.reason.write() {
            *r = None;
        }
    }

    /// Return `Err(Cancelled(operation))` once the flag has been triggered.
    pub fn check(&self, operation: &'static str) -> EngineResult<()> {
        if self.is_cancelled() {
            tracing::warn!(
                operation,
                reason = self.reason().as_deref().unwrap_or("unspecified"),
                "Operation cancelled"
            );
            Err(EngineError::Cancelled(operation))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        assert!(flag.check("build_map").is_ok());

        let clone = flag.clone();
        clone.trigger("ctrl-c");

        assert!(flag.is_cancelled());
        assert_eq!(flag.reason(), Some("ctrl-c".to_string()));
        assert!(matches!(
            flag.check("build_map"),
            Err(EngineError::Cancelled("build_map"))
        ));

        flag.reset();
        assert!(!clone.is_cancelled());
        assert_eq!(clone.reason(), None);
    }
}
