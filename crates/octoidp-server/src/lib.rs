//! # octoidp-server
//!
//! Runs the OctoIdP endpoints over HTTP.
//!
//! - [`config`] - TOML/environment configuration and seed data
//! - [`keys`] - Signing key loading
//! - [`app`] - Provider and router assembly, expired handle sweeping
//! - [`observability`] - Tracing setup

pub mod app;
pub mod config;
pub mod keys;
pub mod observability;

pub use app::{App, Stores, spawn_purge_task};
pub use config::{ServerConfig, ServerConfigError, load_config};
