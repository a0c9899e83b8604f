//! Event types published by a running session.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host
//! application can forward them over whatever transport it uses.

pub mod events;
