//! CLI command implementations.

pub mod crypt;
pub mod settings;
pub mod status;
