//! Automation configuration
//!
//! Declarative YAML describing a run: game metadata, an ordered mapping
//! of step index to step definition, and an optional fallback action.
//! The raw file is deserialized with serde and resolved once at load
//! time into an immutable [`AutomationPlan`]; in particular the dynamic
//! step-action shape (bare `"wait"` string vs. structured directive)
//! becomes a tagged [`ActionDirective`] here, not at execution time.

use crate::element::TargetDescriptor;
use crate::error::{Error, Result};
use crate::protocol::MouseButton;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

const MAX_STEP_RETRIES: u32 = 3;
const DEFAULT_WAIT_SECS: u64 = 10;
const DEFAULT_CLICK_DELAY_SECS: f64 = 2.0;
const DEFAULT_ACTION_DELAY_SECS: f64 = 1.0;

/// Per-step bound on retry attempts before the run fails.
pub const fn max_step_retries() -> u32 {
    MAX_STEP_RETRIES
}

/// Click tuning for find_and_click steps.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClickOptions {
    #[serde(default)]
    pub button: MouseButton,
    #[serde(default = "default_move_duration")]
    pub move_duration: f64,
    #[serde(default = "default_click_delay")]
    pub click_delay: f64,
}

fn default_move_duration() -> f64 {
    0.5
}

fn default_click_delay() -> f64 {
    1.0
}

impl Default for ClickOptions {
    fn default() -> Self {
        Self {
            button: MouseButton::Left,
            move_duration: default_move_duration(),
            click_delay: default_click_delay(),
        }
    }
}

/// A structured action directive, resolved at config-load time.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionDirective {
    Wait { duration: u64 },
    Key { key: String },
    RightClick { x: i32, y: i32 },
    DoubleClick { x: i32, y: i32, button: MouseButton },
    Hotkey { keys: Vec<String> },
}

/// What a step does.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    FindAndClick {
        target: TargetDescriptor,
        click: ClickOptions,
        verify: Vec<TargetDescriptor>,
    },
    Action(ActionDirective),
}

/// One resolved step of the plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// 1-indexed, contiguous.
    pub index: u32,
    pub description: String,
    pub kind: StepKind,
    /// Settle time after the step's action, in seconds.
    pub expected_delay: f64,
}

/// Recovery action executed between failed retry attempts of a step.
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackKind {
    Key(String),
    Click { x: i32, y: i32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FallbackAction {
    pub kind: FallbackKind,
    /// Settle time after the fallback, in seconds.
    pub delay: f64,
}

impl Default for FallbackAction {
    fn default() -> Self {
        Self {
            kind: FallbackKind::Key("escape".to_string()),
            delay: 1.0,
        }
    }
}

/// The validated, immutable run configuration.
#[derive(Debug, Clone)]
pub struct AutomationPlan {
    pub game_name: String,
    /// Expected OS process name when it differs from the executable.
    pub expected_process: Option<String>,
    /// Path of the game executable on the SUT, if the config launches it.
    pub game_path: Option<String>,
    /// Take process-status snapshots at run checkpoints.
    pub monitor_process: bool,
    pub steps: Vec<Step>,
    pub fallback: FallbackAction,
}

impl AutomationPlan {
    /// Load and validate a plan from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&text)
    }

    /// Parse and validate a plan from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(text)?;
        raw.resolve()
    }

    pub fn step_count(&self) -> u32 {
        self.steps.len() as u32
    }
}

// ---------------------------------------------------------------------------
// Raw serde model
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    metadata: RawMetadata,
    #[serde(default)]
    enhanced_features: RawFeatures,
    #[serde(default)]
    steps: BTreeMap<StepKey, RawStep>,
    #[serde(default)]
    fallbacks: RawFallbacks,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    game_name: Option<String>,
    process_id: Option<String>,
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFeatures {
    #[serde(default)]
    monitor_process_cpu: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RawFallbacks {
    general: Option<RawFallback>,
}

#[derive(Debug, Deserialize)]
struct RawFallback {
    action: String,
    key: Option<String>,
    x: Option<i32>,
    y: Option<i32>,
    expected_delay: Option<f64>,
}

/// Step keys appear as integers or numeric strings in the wild.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(untagged)]
enum StepKey {
    Index(u64),
    Name(String),
}

impl StepKey {
    fn index(&self) -> Result<u32> {
        match self {
            StepKey::Index(n) => u32::try_from(*n)
                .map_err(|_| Error::InvalidConfig(format!("step index {} out of range", n))),
            StepKey::Name(s) => s
                .trim()
                .parse::<u32>()
                .map_err(|_| Error::InvalidConfig(format!("step key '{}' is not an integer", s))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    description: String,
    find_and_click: Option<TargetDescriptor>,
    action: Option<RawAction>,
    #[serde(default)]
    verify_success: Vec<TargetDescriptor>,
    expected_delay: Option<f64>,
    duration: Option<u64>,
    click: Option<ClickOptions>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAction {
    Bare(String),
    Directive(RawDirective),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawDirective {
    Wait {
        duration: Option<u64>,
    },
    #[serde(alias = "keypress")]
    Key {
        key: String,
    },
    RightClick {
        #[serde(default)]
        x: i32,
        #[serde(default)]
        y: i32,
    },
    DoubleClick {
        x: i32,
        y: i32,
        #[serde(default)]
        button: MouseButton,
    },
    Hotkey {
        keys: Vec<String>,
    },
}

impl RawConfig {
    fn resolve(self) -> Result<AutomationPlan> {
        if self.steps.is_empty() {
            return Err(Error::InvalidConfig("no steps defined".to_string()));
        }

        let mut by_index: BTreeMap<u32, RawStep> = BTreeMap::new();
        for (key, step) in self.steps {
            let index = key.index()?;
            if by_index.insert(index, step).is_some() {
                return Err(Error::InvalidConfig(format!(
                    "step {} defined more than once",
                    index
                )));
            }
        }

        // Indices must be contiguous starting at 1; a hole cannot be
        // fixed by retrying, so it aborts before the run starts.
        let count = by_index.len() as u32;
        for expected in 1..=count {
            if !by_index.contains_key(&expected) {
                let available: Vec<u32> = by_index.keys().copied().collect();
                return Err(Error::InvalidConfig(format!(
                    "step {} missing; available steps: {:?}",
                    expected, available
                )));
            }
        }

        let mut steps = Vec::with_capacity(by_index.len());
        for (index, raw) in by_index {
            steps.push(resolve_step(index, raw)?);
        }

        let fallback = match self.fallbacks.general {
            Some(raw) => resolve_fallback(raw)?,
            None => FallbackAction::default(),
        };

        let game_name = self
            .metadata
            .game_name
            .unwrap_or_else(|| "Unknown Game".to_string());
        debug!("Resolved {} steps for '{}'", steps.len(), game_name);

        Ok(AutomationPlan {
            game_name,
            expected_process: self.metadata.process_id,
            game_path: self.metadata.path,
            monitor_process: self.enhanced_features.monitor_process_cpu,
            steps,
            fallback,
        })
    }
}

/// Delays end up in `std::time::Duration`, which rejects negative and
/// non-finite values by panicking.
fn valid_delay(seconds: f64) -> bool {
    seconds.is_finite() && seconds >= 0.0
}

fn resolve_step(index: u32, raw: RawStep) -> Result<Step> {
    let kind = match (raw.find_and_click, raw.action) {
        (Some(target), None) => StepKind::FindAndClick {
            target,
            click: raw.click.unwrap_or_default(),
            verify: raw.verify_success,
        },
        (None, Some(action)) => {
            StepKind::Action(resolve_directive(index, action, raw.duration)?)
        }
        (Some(_), Some(_)) => {
            return Err(Error::InvalidConfig(format!(
                "step {} has both find_and_click and action",
                index
            )))
        }
        (None, None) => {
            return Err(Error::InvalidConfig(format!(
                "step {} has neither find_and_click nor action",
                index
            )))
        }
    };

    let expected_delay = raw.expected_delay.unwrap_or(match &kind {
        StepKind::FindAndClick { .. } => DEFAULT_CLICK_DELAY_SECS,
        StepKind::Action(_) => DEFAULT_ACTION_DELAY_SECS,
    });
    if !valid_delay(expected_delay) {
        return Err(Error::InvalidConfig(format!(
            "step {}: expected_delay must be a non-negative finite number",
            index
        )));
    }
    if let StepKind::FindAndClick { click, .. } = &kind {
        if !valid_delay(click.move_duration) || !valid_delay(click.click_delay) {
            return Err(Error::InvalidConfig(format!(
                "step {}: click durations must be non-negative finite numbers",
                index
            )));
        }
    }

    Ok(Step {
        index,
        description: raw.description,
        kind,
        expected_delay,
    })
}

fn resolve_directive(
    index: u32,
    action: RawAction,
    step_duration: Option<u64>,
) -> Result<ActionDirective> {
    let directive = match action {
        RawAction::Bare(name) => {
            if name != "wait" {
                return Err(Error::InvalidConfig(format!(
                    "step {}: unknown action '{}'",
                    index, name
                )));
            }
            RawDirective::Wait { duration: None }
        }
        RawAction::Directive(d) => d,
    };

    Ok(match directive {
        RawDirective::Wait { duration } => ActionDirective::Wait {
            duration: duration.or(step_duration).unwrap_or(DEFAULT_WAIT_SECS),
        },
        RawDirective::Key { key } => {
            if key.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "step {}: key action with no key",
                    index
                )));
            }
            ActionDirective::Key { key }
        }
        RawDirective::RightClick { x, y } => ActionDirective::RightClick { x, y },
        RawDirective::DoubleClick { x, y, button } => {
            ActionDirective::DoubleClick { x, y, button }
        }
        RawDirective::Hotkey { keys } => {
            if keys.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "step {}: hotkey action with no keys",
                    index
                )));
            }
            ActionDirective::Hotkey { keys }
        }
    })
}

fn resolve_fallback(raw: RawFallback) -> Result<FallbackAction> {
    let delay = raw.expected_delay.unwrap_or(1.0);
    if !valid_delay(delay) {
        return Err(Error::InvalidConfig(
            "fallback expected_delay must be a non-negative finite number".to_string(),
        ));
    }
    let kind = match raw.action.as_str() {
        "key" => FallbackKind::Key(raw.key.unwrap_or_else(|| "escape".to_string())),
        "click" => FallbackKind::Click {
            x: raw.x.unwrap_or(0),
            y: raw.y.unwrap_or(0),
        },
        other => {
            return Err(Error::InvalidConfig(format!(
                "unknown fallback action '{}'",
                other
            )))
        }
    };
    Ok(FallbackAction { kind, delay })
}
