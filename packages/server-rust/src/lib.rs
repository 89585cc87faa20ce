//! `FleetLink` Server — the per-node control plane: replica index, sync
//! scheduler, packet router, lifecycle tracker, and rule engine.

pub mod config;
pub mod context;
pub mod engine;
pub mod lifecycle;
pub mod replica;
pub mod router;
pub mod scheduler;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{FirstMatchPrecedence, Settings};
pub use context::ControlPlane;
pub use engine::{EventDisposition, RuleEngine, RuleStore, StepOutcome};
pub use lifecycle::LifecycleTracker;
pub use replica::StateReplica;
pub use router::PacketRouter;
pub use scheduler::{DeltaBuffer, SyncDriver, SyncScheduler};
pub use traits::{
    ExternalServices, FileLog, Gateway, InMemorySeenStore, NotificationSink, NullFileLog,
    NullNotificationSink, NullScriptEvaluator, PacketSink, PlayerRef, ScriptEvaluator, SeenStore,
    ServerRef,
};
