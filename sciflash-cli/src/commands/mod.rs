//! Command implementations.
//!
//! Each subcommand group is implemented in its own module.

pub(crate) mod completions;
pub(crate) mod info;
pub(crate) mod session;
