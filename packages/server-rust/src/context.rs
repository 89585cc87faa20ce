//! The explicitly-constructed control-plane context.
//!
//! Everything is wired here once, by the process entry point, and handed
//! around as `Arc`s: no global singletons, so tests and embedders can run
//! any number of independent instances side by side.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fleetlink_core::{LifecycleKind, RuleParseError};

use crate::config::Settings;
use crate::engine::{RuleEngine, RuleStore};
use crate::lifecycle::LifecycleTracker;
use crate::replica::StateReplica;
use crate::router::PacketRouter;
use crate::scheduler::{DeltaBuffer, SyncDriver, SyncScheduler};
use crate::traits::{ExternalServices, PlayerRef};

// ---------------------------------------------------------------------------
// ControlPlane
// ---------------------------------------------------------------------------

/// One node's control plane: replica, scheduler, router, rule engine, and
/// lifecycle tracker, sharing one settings snapshot and one set of injected
/// services.
pub struct ControlPlane {
    pub settings: Arc<Settings>,
    pub replica: Arc<StateReplica>,
    pub buffer: Arc<DeltaBuffer>,
    pub store: Arc<RuleStore>,
    pub engine: Arc<RuleEngine>,
    pub lifecycle: Arc<LifecycleTracker>,
    pub scheduler: Arc<SyncScheduler>,
    router: PacketRouter,
}

impl ControlPlane {
    /// Wires a control plane for the node named `local_node`.
    #[must_use]
    pub fn new(local_node: &str, settings: Settings, services: ExternalServices) -> Self {
        let settings = Arc::new(settings);
        let replica = Arc::new(StateReplica::new());
        let buffer = Arc::new(DeltaBuffer::new());
        let store = Arc::new(RuleStore::new());

        let engine = Arc::new(RuleEngine::new(
            local_node,
            store.clone(),
            replica.clone(),
            services.clone(),
            settings.clone(),
        ));
        let lifecycle = Arc::new(LifecycleTracker::new(
            engine.clone(),
            replica.clone(),
            services.gateway.clone(),
            services.seen.clone(),
            settings.clone(),
        ));
        let scheduler = Arc::new(SyncScheduler::new(
            local_node,
            replica.clone(),
            buffer.clone(),
            services.gateway.clone(),
            services.sink.clone(),
        ));
        let router = PacketRouter::new(
            replica.clone(),
            buffer.clone(),
            lifecycle.clone(),
            services.gateway.clone(),
            services.sink.clone(),
            settings.clone(),
        );

        Self {
            settings,
            replica,
            buffer,
            store,
            engine,
            lifecycle,
            scheduler,
            router,
        }
    }

    /// Spawns the periodic sync driver. The caller owns the handle and its
    /// lifetime.
    #[must_use]
    pub fn start_sync(&self) -> SyncDriver {
        SyncDriver::start(
            self.scheduler.clone(),
            Duration::from_millis(self.settings.sync_period_ms),
        )
    }

    /// Inbound transport callback: one raw message from a backend server.
    pub fn handle_packet(&self, origin_server: &str, bytes: &[u8]) {
        self.router.handle(origin_server, bytes);
    }

    /// Host callback: a player finished connecting to a backend.
    pub fn on_server_connected(&self, player: &PlayerRef, server: &str) {
        self.lifecycle.on_server_connected(player, server);
    }

    /// Host callback: a player disconnected from the network.
    pub fn on_disconnect(&self, player: &PlayerRef) {
        self.lifecycle.on_disconnect(player);
    }

    /// Administrative reload: re-reads every lifecycle kind's rule source
    /// from `dir`. Kinds that fail to parse keep their previous chains; the
    /// failures are returned for reporting.
    pub fn reload_rules(&self, dir: &Path) -> Vec<RuleParseError> {
        self.store.reload_from_dir(dir)
    }

    /// The loaded rule count per kind, for diagnostics.
    #[must_use]
    pub fn rule_counts(&self) -> Vec<(LifecycleKind, usize)> {
        LifecycleKind::ALL
            .iter()
            .map(|&kind| (kind, self.store.chain(kind).len()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
