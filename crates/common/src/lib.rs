//! Common utilities for the head unit
//!
//! This crate provides functionality shared by the head unit crates:
//! error handling, logging setup, and the stop signal every worker pool
//! observes during shutdown.

pub mod error;
pub mod logging;
pub mod stop;

pub use error::{Error, Result};
pub use logging::{LogTarget, setup_logging};
pub use stop::StopSignal;
