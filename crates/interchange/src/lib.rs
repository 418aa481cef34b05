//! qti-interchange: package envelope types and deserialization.
//!
//! A QTI package is a JSON document holding assessment item and
//! assessment test documents. This crate splits a package into typed
//! envelopes (`ItemDocument`, `TestDocument`) and checks the envelope
//! fields every consumer relies on. Node bodies (declarations,
//! processing rules, test structure) stay as `serde_json::Value`;
//! qti-eval and qti-analyze each interpret them.

pub mod deserialize;
pub mod types;

pub use deserialize::{from_interchange, InterchangeError};
pub use types::*;
