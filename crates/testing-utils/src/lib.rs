//! # Scheduler Testing Utils
//!
//! Shared test doubles for the workspace:
//!
//! - **Handlers**: `ScriptedHandler` that succeeds, fails or sleeps while
//!   tracking call counts and peak concurrency
//! - **Repositories**: `FailingTaskRepository` for persistence-error paths
//! - **Helpers**: polling utilities for asserting on asynchronous state
//!
//! ```toml
//! [dev-dependencies]
//! scheduler-testing-utils = { path = "../testing-utils" }
//! ```

pub mod helpers;
pub mod mocks;

pub use helpers::*;
pub use mocks::*;
