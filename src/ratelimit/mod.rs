//! Flow rules, window counters and admission decisions.

mod clock;
mod counter;
mod limiter;
mod rules;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{CounterOutcome, WindowCounter, WindowState};
pub use limiter::{Decision, Limiter, Reason};
pub use rules::{FlowRule, Grade, RuleSet, RuleSnapshot, RuleStore, DEFAULT_WINDOW_SIZE_MS};
