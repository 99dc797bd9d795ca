//! Playtest Controller
//!
//! Drives perception-guided automation runs against a remote SUT agent:
//! the step engine, the typed agent RPC client, the perception service
//! adapter, the game launcher, and run artifact storage.

pub mod artifacts;
pub mod engine;
pub mod launcher;
pub mod perception;
pub mod rpc;

pub use artifacts::ArtifactStore;
pub use engine::{Engine, RunOutcome};
pub use launcher::GameLauncher;
pub use perception::{Detection, PerceptionClient};
pub use rpc::SutClient;
