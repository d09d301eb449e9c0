//! Configuration module for autorip
//!
//! Handles loading settings from TOML files and environment variable overrides.

pub mod config;

pub use config::*;
