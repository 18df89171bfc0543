//! Bootstrap helpers for binaries embedding the cast core

pub mod config;

pub use config::load_config;
