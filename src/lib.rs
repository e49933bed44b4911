//! Flowgate - request admission control
//!
//! This crate decides, per inbound request, whether a protected resource may
//! be entered. Resources are limited by QPS flow rules evaluated against
//! fixed-window counters; resources without a rule are always admitted.
//! Request-handling layers call an [`AdmissionGate`](gate::AdmissionGate)
//! before running a handler and answer `429` when it rejects.

pub mod config;
pub mod error;
pub mod gate;
pub mod global;
pub mod ratelimit;
