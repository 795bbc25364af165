//! Process-wide interrupt flag raised by Ctrl-C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::PoolError;

/// Shared flag observed by code that blocks on jobs.
///
/// Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raise this flag on SIGINT. Only one handler may be installed per
    /// process.
    pub fn install_ctrlc(&self) -> Result<(), PoolError> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            tracing::warn!("interrupt received, stopping after the current wait");
            flag.raise();
        })?;
        Ok(())
    }
}
