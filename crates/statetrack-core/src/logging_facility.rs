//! Structured logging facility
//!
//! - Single initialization point via `init(profile)`
//! - Operation boundary macros (`log_op_start!`, `log_op_end!`, `log_op_error!`)
//! - Test capture mode for deterministic assertions
//!
//! # Usage
//!
//! ```rust
//! use statetrack_core::logging_facility::{init, Profile};
//!
//! init(Profile::Development);
//! ```
//!
//! Public entry points (`begin_tracking`, `compute_diff`,
//! `verify_readonly_members`) bracket their work with the macros. Cache and
//! tracker internals log at `debug`/`trace` with `pair`, `member` and `index`
//! fields.

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
