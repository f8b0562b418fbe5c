//! Build, launch, and teardown of containers under test.
//!
//! Everything here talks to external collaborators (the build tool and
//! the container runtime) through narrow seams so the orchestration in
//! `shipcheck-suite` can run against recorded fakes.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod backend;
pub mod build;
pub mod cleanup;
pub mod command;
pub mod container;
pub mod launcher;
pub mod preflight;
pub mod probe;
pub mod readiness;
pub mod retry;
