//! Inbound override handling.
//!
//! An [`OverrideListener`] pulls sizing overrides from an
//! [`OverrideSource`] and feeds them to
//! [`PoolInspectorService::apply_override`]. It runs independently of the
//! reporting cycle and moves through these states for every message:
//!
//! ```text
//! Idle --> Receiving --> Validating --+--> Applying --> Idle
//!                                     |
//!                                     +--> Idle   (unreadable)
//! ```
//!
//! Overrides for another application or an unknown pool leave `Applying`
//! without touching anything.
//!
//! Nothing a single message does can stop the listener. It exits only when
//! the source closes or shutdown is requested.

use std::future::Future;
use std::sync::Arc;

use dynpool_types::PoolConfig;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::registry::{Registry, RegistryError};
use crate::service::{OverrideOutcome, PoolInspectorService};
use crate::shutdown;

/// Where the listener is in its per-message cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Waiting for the next message.
    Idle,
    /// A message arrived.
    Receiving,
    /// Checking that the message is readable.
    Validating,
    /// Handing the request to the service, which applies or ignores it.
    Applying,
    /// The listener has exited.
    Stopped,
}

/// Stream of override requests.
pub trait OverrideSource: Send {
    /// Wait for the next request. `None` means the source is closed.
    ///
    /// Must be cancel-safe: the listener races it against shutdown.
    fn next_override(
        &mut self,
    ) -> impl Future<Output = Option<Result<PoolConfig, RegistryError>>> + Send;
}

/// In-process [`OverrideSource`] backed by a tokio channel.
pub struct ChannelOverrideSource {
    receiver: mpsc::Receiver<PoolConfig>,
}

impl ChannelOverrideSource {
    /// Create a source and the sender that feeds it.
    pub fn channel(buffer: usize) -> (mpsc::Sender<PoolConfig>, Self) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (sender, Self { receiver })
    }
}

impl OverrideSource for ChannelOverrideSource {
    async fn next_override(&mut self) -> Option<Result<PoolConfig, RegistryError>> {
        self.receiver.recv().await.map(Ok)
    }
}

/// What happened to one received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandledOverride {
    /// The pool was re-sized.
    Applied,
    /// Addressed elsewhere; nothing changed.
    Ignored(OverrideOutcome),
    /// The pool refused the sizing; nothing changed.
    Rejected,
    /// The message could not be read.
    Undecodable,
}

/// Counters over the listener's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Messages received.
    pub received: u64,
    /// Overrides applied.
    pub applied: u64,
    /// Overrides for another application or an unknown pool.
    pub ignored: u64,
    /// Unreadable messages and sizings the pool refused.
    pub rejected: u64,
}

/// The part of the listener that validates and applies one message. Kept
/// apart from the source so the source only needs to be `Send`.
struct Applier<R> {
    service: Arc<PoolInspectorService>,
    registry: Arc<R>,
    republish_on_apply: bool,
    state: watch::Sender<ListenerState>,
}

impl<R: Registry> Applier<R> {
    fn enter(&self, state: ListenerState) {
        self.state.send_replace(state);
    }

    async fn validate_and_apply(
        &self,
        received: Result<PoolConfig, RegistryError>,
    ) -> HandledOverride {
        self.enter(ListenerState::Validating);
        let request = match received {
            Ok(request) => request,
            Err(error) => {
                warn!(error = %error, "discarding unreadable override");
                return HandledOverride::Undecodable;
            }
        };

        self.enter(ListenerState::Applying);
        match self.service.apply_override(&request) {
            Ok(OverrideOutcome::Applied) => {
                if self.republish_on_apply {
                    self.republish(&request.pool_name).await;
                }
                HandledOverride::Applied
            }
            Ok(OverrideOutcome::IdentityMismatch) => {
                debug!(
                    target_app = request.app_name,
                    pool = request.pool_name,
                    "override for another application ignored"
                );
                HandledOverride::Ignored(OverrideOutcome::IdentityMismatch)
            }
            Ok(OverrideOutcome::PoolNotFound) => {
                debug!(pool = request.pool_name, "override for unknown pool ignored");
                HandledOverride::Ignored(OverrideOutcome::PoolNotFound)
            }
            Err(error) => {
                warn!(
                    pool = request.pool_name,
                    core_size = request.core_size,
                    max_size = request.max_size,
                    error = %error,
                    "override rejected"
                );
                HandledOverride::Rejected
            }
        }
    }

    /// Writes only the pool's own record. The batch list belongs to the
    /// reporting job.
    async fn republish(&self, pool_name: &str) {
        let record = self.service.snapshot(pool_name);
        if let Err(error) = self.registry.publish_one(&record).await {
            warn!(pool = pool_name, error = %error, "failed to republish pool record");
        }
    }
}

/// Applies overrides from an [`OverrideSource`] to the managed pools.
pub struct OverrideListener<S, R> {
    applier: Applier<R>,
    source: S,
    stats: ListenerStats,
}

impl<S: OverrideSource, R: Registry> OverrideListener<S, R> {
    /// Create an idle listener.
    pub fn new(service: Arc<PoolInspectorService>, registry: Arc<R>, source: S) -> Self {
        let (state, _) = watch::channel(ListenerState::Idle);
        Self {
            applier: Applier {
                service,
                registry,
                republish_on_apply: false,
                state,
            },
            source,
            stats: ListenerStats::default(),
        }
    }

    /// Publish the re-sized pool's record right after an override is applied,
    /// instead of waiting for the next reporting cycle. The batch list is
    /// still refreshed only by the reporting job.
    #[must_use]
    pub const fn republish_on_apply(mut self, enabled: bool) -> Self {
        self.applier.republish_on_apply = enabled;
        self
    }

    /// Watch the listener's state.
    pub fn state(&self) -> watch::Receiver<ListenerState> {
        self.applier.state.subscribe()
    }

    /// Counters so far.
    pub const fn stats(&self) -> ListenerStats {
        self.stats
    }

    /// Process one received message and return to [`ListenerState::Idle`].
    pub async fn handle(&mut self, received: Result<PoolConfig, RegistryError>) -> HandledOverride {
        self.applier.enter(ListenerState::Receiving);
        self.stats.received = self.stats.received.saturating_add(1);

        let handled = self.applier.validate_and_apply(received).await;
        match handled {
            HandledOverride::Applied => {
                self.stats.applied = self.stats.applied.saturating_add(1);
            }
            HandledOverride::Ignored(_) => {
                self.stats.ignored = self.stats.ignored.saturating_add(1);
            }
            HandledOverride::Rejected | HandledOverride::Undecodable => {
                self.stats.rejected = self.stats.rejected.saturating_add(1);
            }
        }

        self.applier.enter(ListenerState::Idle);
        handled
    }

    /// Process messages until the source closes or `shutdown` fires.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> ListenerStats {
        info!(
            app_name = self.applier.service.app_name(),
            "override listener started"
        );
        self.applier.enter(ListenerState::Idle);

        loop {
            let next = tokio::select! {
                next = self.source.next_override() => next,
                () = shutdown::requested(&mut shutdown) => break,
            };
            let Some(received) = next else {
                info!("override source closed");
                break;
            };
            self.handle(received).await;
        }

        self.applier.enter(ListenerState::Stopped);
        info!(
            received = self.stats.received,
            applied = self.stats.applied,
            ignored = self.stats.ignored,
            rejected = self.stats.rejected,
            "override listener stopped"
        );
        self.stats
    }
}
