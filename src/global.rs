//! Process-wide flow control state.
//!
//! Applications that want a single shared limiter call [`initialize`] once
//! at startup and [`teardown`] when shutting down. Nothing is installed
//! implicitly.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use crate::error::{FlowgateError, Result};
use crate::gate::AdmissionGate;
use crate::ratelimit::{FlowRule, Limiter};

static GLOBAL: RwLock<Option<Arc<Limiter>>> = RwLock::new(None);

/// Install the process-wide limiter with an initial rule set.
///
/// Fails with [`FlowgateError::AlreadyInitialized`] if a limiter is already
/// installed, and with [`FlowgateError::InvalidConfiguration`] if the rules
/// are invalid (nothing is installed in that case).
pub fn initialize<I>(rules: I) -> Result<Arc<Limiter>>
where
    I: IntoIterator<Item = FlowRule>,
{
    let mut slot = GLOBAL.write();
    if slot.is_some() {
        return Err(FlowgateError::AlreadyInitialized);
    }

    let limiter = Arc::new(Limiter::with_rules(rules)?);
    *slot = Some(Arc::clone(&limiter));
    info!("Process-wide flow control initialized");
    Ok(limiter)
}

/// Replace the rules of the process-wide limiter.
pub fn load_rules<I>(rules: I) -> Result<()>
where
    I: IntoIterator<Item = FlowRule>,
{
    global()
        .ok_or(FlowgateError::NotInitialized)?
        .load_rules(rules)
}

/// The process-wide limiter, if one is installed.
pub fn global() -> Option<Arc<Limiter>> {
    GLOBAL.read().clone()
}

/// An admission gate over the process-wide limiter.
pub fn gate() -> Result<AdmissionGate> {
    global()
        .map(AdmissionGate::new)
        .ok_or(FlowgateError::NotInitialized)
}

/// Remove the process-wide limiter, dropping its rules and counters.
///
/// Handles obtained earlier keep working on the old limiter. Returns whether
/// a limiter was installed.
pub fn teardown() -> bool {
    let previous = GLOBAL.write().take();
    if previous.is_some() {
        info!("Process-wide flow control torn down");
    }
    previous.is_some()
}
