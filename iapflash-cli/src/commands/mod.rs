//! Command implementations.
//!
//! Each subcommand is implemented in its own module; `update` holds what the
//! session-driving commands share.

pub(crate) mod completions;
pub(crate) mod flash;
pub(crate) mod ports;
pub(crate) mod update;
pub(crate) mod version;
pub(crate) mod wizard;
