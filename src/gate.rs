//! Admission gate for request-handling layers.
//!
//! The gate is what a server calls before running a protected handler. It
//! derives the resource name, asks the [`Limiter`] for a decision, and turns
//! that decision into "proceed" or "answer 429 now".

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::ratelimit::{Clock, Limiter, Reason, SystemClock};

/// Status for requests that may proceed.
pub const STATUS_OK: u16 = 200;
/// Status for requests rejected by a flow rule.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// What the request-handling layer should do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Run the protected handler.
    Allow {
        /// Whether a rule was consulted
        reason: Reason,
    },
    /// Skip the handler and answer with `status`.
    Reject {
        /// Protocol status to answer with
        status: u16,
        /// Suggested wait before retrying
        retry_after: Duration,
    },
}

impl GateOutcome {
    /// Whether the handler should run.
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateOutcome::Allow { .. })
    }

    /// The response status this outcome maps to.
    pub fn status(&self) -> u16 {
        match self {
            GateOutcome::Allow { .. } => STATUS_OK,
            GateOutcome::Reject { status, .. } => *status,
        }
    }
}

/// Entry point for the request-handling layer.
///
/// The gate keeps no state of its own; counters and rules live in the shared
/// [`Limiter`].
pub struct AdmissionGate<C: Clock = SystemClock> {
    limiter: Arc<Limiter>,
    clock: C,
}

impl AdmissionGate<SystemClock> {
    /// Create a gate reading the wall clock.
    pub fn new(limiter: Arc<Limiter>) -> Self {
        Self::with_clock(limiter, SystemClock)
    }
}

impl<C: Clock> AdmissionGate<C> {
    /// Create a gate with a specific time source.
    pub fn with_clock(limiter: Arc<Limiter>, clock: C) -> Self {
        Self { limiter, clock }
    }

    /// Check a request for `resource` now.
    pub fn check(&self, resource: &str) -> Result<GateOutcome> {
        self.check_at(resource, self.clock.now_millis())
    }

    /// Check a request for `resource` at an explicit time in milliseconds.
    #[instrument(level = "trace", skip(self))]
    pub fn check_at(&self, resource: &str, now: i64) -> Result<GateOutcome> {
        let decision = self.limiter.admit(resource, now)?;

        if decision.admitted {
            return Ok(GateOutcome::Allow {
                reason: decision.reason,
            });
        }

        let retry_after = decision.retry_after.unwrap_or_default();
        debug!(
            resource = %resource,
            retry_after_ms = retry_after.as_millis() as u64,
            "Rejecting request"
        );
        Ok(GateOutcome::Reject {
            status: STATUS_TOO_MANY_REQUESTS,
            retry_after,
        })
    }

    /// Check an HTTP request target such as `/sayHello?name=x`, using its
    /// path as the resource name.
    pub fn check_request(&self, target: &str) -> Result<GateOutcome> {
        self.check(resource_from_target(target))
    }

    /// The limiter behind this gate.
    pub fn limiter(&self) -> &Arc<Limiter> {
        &self.limiter
    }
}

/// Extract the resource name from a request target.
///
/// Query strings and fragments are dropped. Absolute targets
/// (`http://host/path`) lose their scheme and authority; a target that
/// already starts with `/` is taken as a path as-is. An empty path becomes `/`.
pub fn resource_from_target(target: &str) -> &str {
    let target = target.trim();
    let end = target.find(['?', '#']).unwrap_or(target.len());
    let mut path = &target[..end];

    let absolute = !path.starts_with('/');
    if let Some(scheme_end) = path.find("://").filter(|_| absolute) {
        let after_scheme = &path[scheme_end + 3..];
        path = after_scheme
            .find('/')
            .map(|slash| &after_scheme[slash..])
            .unwrap_or("");
    }

    if path.is_empty() {
        "/"
    } else {
        path
    }
}
