//! Worker pools and the control loop that reports and re-sizes them.
//!
//! A process registers its pools with a [`PoolInspectorService`]. A
//! [`ReportingJob`] periodically publishes every pool's snapshot to a
//! [`Registry`], and an [`OverrideListener`] applies sizing overrides that
//! arrive from an [`OverrideSource`].
//!
//! # Modules
//!
//! - [`pool`] -- [`WorkerPool`], a thread pool whose core and max sizes can
//!   change while it runs.
//! - [`service`] -- [`PoolInspectorService`]: snapshots and override
//!   application.
//! - [`registry`] -- The [`Registry`] capability and [`InMemoryRegistry`].
//! - [`reporting`] -- The periodic publishing job.
//! - [`listener`] -- The inbound override listener.
//! - [`config`] -- Configuration loading from `dynpool-config.yaml`.
//! - [`shutdown`] -- Stop signal shared by the background tasks.
//!
//! [`WorkerPool`]: pool::WorkerPool
//! [`PoolInspectorService`]: service::PoolInspectorService
//! [`Registry`]: registry::Registry
//! [`InMemoryRegistry`]: registry::InMemoryRegistry
//! [`ReportingJob`]: reporting::ReportingJob
//! [`OverrideListener`]: listener::OverrideListener
//! [`OverrideSource`]: listener::OverrideSource

pub mod config;
pub mod listener;
pub mod pool;
pub mod registry;
pub mod reporting;
pub mod service;
pub mod shutdown;
