//! Scenario orchestration for the shipcheck harness.
//!
//! A [`scenario::Scenario`] describes one build-launch-verify cycle. The
//! [`runner::ScenarioRunner`] drives it through its state machine, always
//! finishing with cleanup, and aggregates the outcome into
//! [`report::RunReport`].

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod assertion;
pub mod catalog;
pub mod report;
pub mod runner;
pub mod scenario;
