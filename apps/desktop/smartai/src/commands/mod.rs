//! Pull operations the UI collaborator invokes.
//!
//! Each takes the running bus explicitly so it can be driven from the
//! console, tests, or a future window shell alike.

pub mod control;
pub mod data;
pub mod export;
