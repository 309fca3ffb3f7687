//! Core types shared across statetrack facilities
//!
//! - **Schema constants**: canonical field keys and event names used by the
//!   logging macros and the tracker internals

pub mod schema;
