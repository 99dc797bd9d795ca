//! Playtest Common Library
//!
//! Shared types for the Playtest automation platform: error handling,
//! the automation plan loaded from YAML, UI element matching, and the
//! request/response protocol between the controller and the SUT agent.

pub mod config;
pub mod element;
pub mod error;
pub mod protocol;

pub use config::{
    ActionDirective, AutomationPlan, ClickOptions, FallbackAction, FallbackKind, Step, StepKind,
};
pub use element::{TargetDescriptor, TextMatch, UiElement};
pub use error::{Error, Result};

/// Playtest version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
