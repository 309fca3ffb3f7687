//! Canonical schema constants for structured logging and events
//!
//! These constants keep field names consistent between the logging macros,
//! the tracker internals and test assertions.

// Canonical field keys for structured logging
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";

// Tracking identifiers
pub const FIELD_PAIR: &str = "pair";
pub const FIELD_NODE: &str = "node";
pub const FIELD_CYCLE: &str = "cycle";
pub const FIELD_REFERENCE_HANDLING: &str = "reference_handling";
pub const FIELD_TYPE_NAME: &str = "type_name";

// Diff keys
pub const FIELD_MEMBER: &str = "member";

// Error fields
pub const FIELD_ERR_KIND: &str = "err.kind";
pub const FIELD_ERR_CODE: &str = "err.code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
