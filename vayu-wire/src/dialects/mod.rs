//! Built-in dialect definitions

pub mod common;
