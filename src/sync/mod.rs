//! Sync orchestration: pushes queued changes and binaries to the remote system.
//!
//! The orchestrator owns the drain pass; the remote API and connectivity
//! signal are injected through the traits and watcher defined here.

pub mod connectivity;
pub mod http;
pub mod metadata;
pub mod orchestrator;
pub mod remote;
pub mod retry;

pub use connectivity::{probe_connectivity, ConnectivityWatcher};
pub use http::HttpRemote;
pub use metadata::{MetadataStore, SyncClass, SyncMetadata, SyncPhase};
pub use orchestrator::{
  OrchestratorState, SyncOrchestrator, SyncReport, SyncSettings, SyncSnapshot, TriggerOutcome,
  TriggerSource,
};
pub use remote::{BinaryUpload, PushOutcome, RemoteApi};
pub use retry::RetryPolicy;
