//! Playtest SUT Agent
//!
//! HTTP service run on the System Under Test: screenshot capture, input
//! injection, game process launch/terminate, and status reporting.

pub mod desktop;
pub mod procs;
pub mod server;
pub mod session;

pub use desktop::{Desktop, HeadlessDesktop};
pub use procs::ProcessSupervisor;
pub use server::{router, AppState};
pub use session::{GameSession, SessionTiming};
