//! Consolidated integration tests for provseal-core.
//!
//! One test binary instead of one per file keeps link time down and lets
//! the fixtures module be shared.

mod corruption;
mod fixtures;
mod precedence;
mod round_trip;
mod store;
mod validation;
