//! Command implementations behind the `taskflow` binary.

pub mod commands;
