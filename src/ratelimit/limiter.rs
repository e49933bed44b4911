//! Core admission decisions.

use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{FlowgateError, Result};

use super::counter::{CounterOutcome, WindowCounter};
use super::rules::{FlowRule, Grade, RuleStore};

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    /// A rule applied and the window had room
    Ok,
    /// A rule applied and the window was full
    RateLimited,
    /// No rule is configured for the resource
    NoRule,
}

/// The outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub admitted: bool,
    /// Why
    pub reason: Reason,
    /// Quota left in the current window, when a rule applied
    pub remaining: Option<u64>,
    /// Time until the full window elapses, for rejected requests
    pub retry_after: Option<Duration>,
}

impl Decision {
    /// An admission for a resource without a rule.
    pub fn no_rule() -> Self {
        Self {
            admitted: true,
            reason: Reason::NoRule,
            remaining: None,
            retry_after: None,
        }
    }

    /// An admission counted against a rule.
    pub fn ok(remaining: u64) -> Self {
        Self {
            admitted: true,
            reason: Reason::Ok,
            remaining: Some(remaining),
            retry_after: None,
        }
    }

    /// A rejection by a full window.
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self {
            admitted: false,
            reason: Reason::RateLimited,
            remaining: Some(0),
            retry_after: Some(retry_after),
        }
    }
}

impl From<CounterOutcome> for Decision {
    fn from(outcome: CounterOutcome) -> Self {
        match outcome {
            CounterOutcome::Admitted { remaining } => Decision::ok(remaining),
            CounterOutcome::Rejected { retry_after } => Decision::rate_limited(retry_after),
        }
    }
}

/// Combines the active rules with per-resource window counters.
///
/// This struct is thread-safe and can be shared across threads and tasks.
#[derive(Default)]
pub struct Limiter {
    rules: RuleStore,
    counters: WindowCounter,
}

impl Limiter {
    /// Create a limiter with no rules, which admits everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a limiter and load an initial rule set.
    pub fn with_rules<I>(rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = FlowRule>,
    {
        let limiter = Self::new();
        limiter.load_rules(rules)?;
        Ok(limiter)
    }

    /// Replace the active rules. On error the previous rules stay active.
    ///
    /// Window counters survive a reload, so reloading an identical rule set
    /// has no effect on decisions.
    pub fn load_rules<I>(&self, rules: I) -> Result<()>
    where
        I: IntoIterator<Item = FlowRule>,
    {
        self.rules.load(rules)
    }

    /// The active rules, sorted by resource name.
    pub fn rules(&self) -> Vec<FlowRule> {
        self.rules.rules()
    }

    /// Decide whether a request for `resource` at `now` (milliseconds) is admitted,
    /// counting it if so.
    pub fn admit(&self, resource: &str, now: i64) -> Result<Decision> {
        if resource.is_empty() {
            return Err(FlowgateError::InvalidArgument(
                "resource name must not be empty".to_string(),
            ));
        }
        if now < 0 {
            return Err(FlowgateError::InvalidArgument(format!(
                "timestamp must not be negative, got {}",
                now
            )));
        }

        let Some(rule) = self.rules.lookup(resource) else {
            trace!(resource = %resource, "No flow rule, admitting");
            return Ok(Decision::no_rule());
        };

        let outcome = match rule.grade {
            Grade::Qps => {
                self.counters
                    .try_increment(resource, now, rule.window_size_ms, rule.count)
            }
        };

        let decision = Decision::from(outcome);
        if decision.admitted {
            trace!(resource = %resource, remaining = ?decision.remaining, "Request admitted");
        } else {
            debug!(
                resource = %resource,
                count = rule.count,
                window_size_ms = rule.window_size_ms,
                "Flow limit exceeded"
            );
        }

        Ok(decision)
    }

    /// The window counters backing this limiter.
    pub fn counters(&self) -> &WindowCounter {
        &self.counters
    }
}
