//! Shared type definitions for dynpool.
//!
//! Everything that crosses the registry boundary is defined here, so the
//! reporting process, operator tooling, and dashboards agree on one wire
//! format. [`PoolConfig`] and [`RemainingCapacity`] also export `TypeScript`
//! bindings via `ts-rs`.
//!
//! # Modules
//!
//! - [`pool_config`] -- The pool snapshot / override record
//! - [`registry_key`] -- Well-known registry key names

pub mod pool_config;
pub mod registry_key;

pub use pool_config::{PoolConfig, RemainingCapacity, UNKNOWN_APP_NAME, normalize_app_name};
pub use registry_key::RegistryKey;
