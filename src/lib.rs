//! Runs external processes with a cap on how many are alive at once.
//!
//! A [`Process`] services its child's redirected stdin and stdout from
//! whichever thread polls it, and a [`ProcessQueue`] keeps a bounded window of
//! them running until a task list is exhausted. No threads are spawned: all
//! progress happens inside the polling calls.

pub mod app;
pub mod error;
pub mod manager;
pub mod models;
pub mod worker;

pub use error::{Error, Result};
pub use manager::{Job, Params, ProcessQueue, StatusCallback};
pub use models::{Status, Task};
pub use worker::{Process, Redirect, UNKNOWN_EXIT_CODE};
