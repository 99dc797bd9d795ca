//! Automation engine
//!
//! The step state machine: capture a screenshot, ask perception for UI
//! elements, match the step's target, act through the agent, verify,
//! and advance. Application-tier failures feed a bounded retry with a
//! fallback action between attempts; connectivity failures propagate.
//! A shared stop signal is polled at loop boundaries and inside every
//! decomposed wait tick, so cancellation latency is bounded by the tick
//! granularity except during an in-flight network call.

use crate::artifacts::ArtifactStore;
use crate::perception::{Detection, PerceptionClient};
use crate::rpc::SutClient;
use playtest_common::config::{
    max_step_retries, ActionDirective, AutomationPlan, ClickOptions, FallbackKind, Step, StepKind,
};
use playtest_common::protocol::{ActionRequest, MouseButton};
use playtest_common::{Result, TargetDescriptor, UiElement};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const WAIT_TICK: Duration = Duration::from_secs(1);
const WAIT_PROGRESS_EVERY: u64 = 10;

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every step succeeded.
    Completed,
    /// The stop signal was raised; not an error.
    Aborted,
    /// A step exhausted its retries.
    Failed { step: u32 },
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Aborted => write!(f, "aborted"),
            RunOutcome::Failed { step } => write!(f, "failed at step {}", step),
        }
    }
}

enum StepOutcome {
    Success,
    Failure(String),
    Aborted,
}

/// Drives one automation run to a terminal state.
pub struct Engine {
    plan: AutomationPlan,
    sut: SutClient,
    perception: PerceptionClient,
    artifacts: ArtifactStore,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        plan: AutomationPlan,
        sut: SutClient,
        perception: PerceptionClient,
        artifacts: ArtifactStore,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            plan,
            sut,
            perception,
            artifacts,
            cancel,
        }
    }

    /// Run all steps in order.
    ///
    /// Success advances and resets the retry counter; a failure runs
    /// the fallback and retries the same step, up to the bound, after
    /// which the run fails visibly.
    pub async fn run(&self) -> Result<RunOutcome> {
        let total = self.plan.step_count();
        info!(
            "Starting automation '{}' with {} steps",
            self.plan.game_name, total
        );
        self.checkpoint("before_automation").await;

        let mut current: u32 = 1;
        let mut retries: u32 = 0;
        while current <= total {
            if self.cancel.is_cancelled() {
                info!("Stop requested, ending automation");
                return Ok(RunOutcome::Aborted);
            }

            let step = &self.plan.steps[(current - 1) as usize];
            info!("Executing step {}: {}", current, step.description);

            match self.execute_step(step).await? {
                StepOutcome::Success => {
                    info!("Step {} completed successfully", current);
                    current += 1;
                    retries = 0;
                    let done = current - 1;
                    if done == 3 || done == 5 || done == total {
                        self.checkpoint(&format!("after_step_{}", done)).await;
                    }
                }
                StepOutcome::Failure(reason) => {
                    retries += 1;
                    warn!(
                        "Step {} failed ({}), retry {}/{}",
                        current,
                        reason,
                        retries,
                        max_step_retries()
                    );
                    if retries >= max_step_retries() {
                        error!("Max retries reached for step {}, failing run", current);
                        return Ok(RunOutcome::Failed { step: current });
                    }
                    self.execute_fallback().await;
                }
                StepOutcome::Aborted => {
                    info!("Stop requested, ending automation");
                    return Ok(RunOutcome::Aborted);
                }
            }
        }

        info!("All steps completed successfully");
        self.checkpoint("after_automation").await;
        Ok(RunOutcome::Completed)
    }

    async fn execute_step(&self, step: &Step) -> Result<StepOutcome> {
        match &step.kind {
            StepKind::FindAndClick {
                target,
                click,
                verify,
            } => self.find_and_click(step, target, click, verify).await,
            StepKind::Action(directive) => self.run_directive(step, directive).await,
        }
    }

    async fn find_and_click(
        &self,
        step: &Step,
        target: &TargetDescriptor,
        click: &ClickOptions,
        verify: &[TargetDescriptor],
    ) -> Result<StepOutcome> {
        let detection = match self
            .capture_and_detect(&format!("screenshot_{}", step.index), &format!(
                "annotated_{}",
                step.index
            ))
            .await
        {
            Ok(detection) => detection,
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => return Ok(StepOutcome::Failure(format!("perception failed: {}", e))),
        };

        let Some(element) = target.find_match(&detection.elements) else {
            warn!(
                "Target element '{}' (type: {}) not found",
                target.text, target.element_type
            );
            log_available_elements(&detection.elements);
            return Ok(StepOutcome::Failure(format!(
                "target '{}' not found",
                target.text
            )));
        };

        let (x, y) = element.center();
        let request = ActionRequest::Click {
            x,
            y,
            move_duration: click.move_duration,
            click_delay: click.click_delay,
            button: click.button,
        };
        match self.sut.action(&request).await {
            Ok(_) => info!(
                "{}-clicked '{}' at ({}, {})",
                click.button.as_str(),
                element.element_text,
                x,
                y
            ),
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => return Ok(StepOutcome::Failure(format!("click failed: {}", e))),
        }

        debug!("Waiting {}s after click", step.expected_delay);
        if !self.settle(step.expected_delay).await {
            return Ok(StepOutcome::Aborted);
        }

        if verify.is_empty() {
            return Ok(StepOutcome::Success);
        }
        self.verify_step(step, verify).await
    }

    /// Re-capture and require every verification target to be present.
    async fn verify_step(
        &self,
        step: &Step,
        verify: &[TargetDescriptor],
    ) -> Result<StepOutcome> {
        info!("Verifying step {} success", step.index);
        let label = format!("verify_{}", step.index);
        let detection = match self.capture_and_detect(&label, &label).await {
            Ok(detection) => detection,
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => {
                return Ok(StepOutcome::Failure(format!(
                    "verification capture failed: {}",
                    e
                )))
            }
        };

        for expected in verify {
            if expected.find_match(&detection.elements).is_none() {
                warn!("Verification failed: '{}' not found", expected.text);
                return Ok(StepOutcome::Failure(format!(
                    "verification target '{}' not found",
                    expected.text
                )));
            }
        }
        Ok(StepOutcome::Success)
    }

    async fn run_directive(
        &self,
        step: &Step,
        directive: &ActionDirective,
    ) -> Result<StepOutcome> {
        let request = match directive {
            ActionDirective::Wait { duration } => {
                info!("Waiting for {} seconds", duration);
                return Ok(if self.wait_ticks(*duration).await {
                    StepOutcome::Success
                } else {
                    StepOutcome::Aborted
                });
            }
            ActionDirective::Key { key } => {
                info!("Pressing key: {}", key);
                ActionRequest::Key { key: key.clone() }
            }
            ActionDirective::RightClick { x, y } => {
                info!("Right-clicking at ({}, {})", x, y);
                ActionRequest::Click {
                    x: *x,
                    y: *y,
                    move_duration: 0.5,
                    click_delay: 1.0,
                    button: MouseButton::Right,
                }
            }
            ActionDirective::DoubleClick { x, y, button } => {
                info!("Double-clicking at ({}, {})", x, y);
                ActionRequest::DoubleClick {
                    x: *x,
                    y: *y,
                    button: *button,
                    move_duration: 0.5,
                }
            }
            ActionDirective::Hotkey { keys } => {
                info!("Pressing hotkey: {}", keys.join("+"));
                ActionRequest::Hotkey { keys: keys.clone() }
            }
        };

        match self.sut.action(&request).await {
            Ok(_) => {}
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => return Ok(StepOutcome::Failure(format!("action failed: {}", e))),
        }
        if !self.settle(step.expected_delay).await {
            return Ok(StepOutcome::Aborted);
        }
        Ok(StepOutcome::Success)
    }

    /// Screenshot via the agent, detection via perception, artifacts on
    /// the side (artifact and annotation problems are warnings only).
    async fn capture_and_detect(
        &self,
        screenshot_label: &str,
        annotation_label: &str,
    ) -> Result<Detection> {
        let png = self.sut.screenshot().await?;
        self.artifacts.save_screenshot(screenshot_label, &png).await;

        let detection = self.perception.detect(&png).await?;
        if let Some(annotated) = &detection.annotated_png {
            self.artifacts
                .save_annotation(annotation_label, annotated)
                .await;
        }
        self.artifacts
            .save_detection(screenshot_label, &detection.raw)
            .await;
        Ok(detection)
    }

    /// Recovery action between retries; errors here are logged, never
    /// escalated, since the retry itself will surface real trouble.
    async fn execute_fallback(&self) {
        let request = match &self.plan.fallback.kind {
            FallbackKind::Key(key) => {
                info!("Executing fallback: press key {}", key);
                ActionRequest::Key { key: key.clone() }
            }
            FallbackKind::Click { x, y } => {
                info!("Executing fallback: click at ({}, {})", x, y);
                ActionRequest::Click {
                    x: *x,
                    y: *y,
                    move_duration: 0.5,
                    click_delay: 1.0,
                    button: MouseButton::Left,
                }
            }
        };
        if let Err(e) = self.sut.action(&request).await {
            error!("Failed to execute fallback action: {}", e);
        }
        debug!("Waiting {}s after fallback", self.plan.fallback.delay);
        self.settle(self.plan.fallback.delay).await;
    }

    /// Decomposed wait: 1-second ticks so a stop request lands within
    /// one tick, with periodic progress logging for long waits.
    async fn wait_ticks(&self, seconds: u64) -> bool {
        for elapsed in 0..seconds {
            if elapsed > 0 && elapsed % WAIT_PROGRESS_EVERY == 0 {
                info!("Still waiting... {}/{}s elapsed", elapsed, seconds);
            }
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Wait interrupted by stop signal");
                    return false;
                }
                _ = tokio::time::sleep(WAIT_TICK) => {}
            }
        }
        true
    }

    /// Short cancellable settle delay (fractional seconds). Values that
    /// cannot form a `Duration` are treated as zero.
    async fn settle(&self, seconds: f64) -> bool {
        if !seconds.is_finite() || seconds <= 0.0 {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(Duration::from_secs_f64(seconds)) => true,
        }
    }

    /// Process-status snapshot at a monitoring checkpoint. Never affects
    /// the run outcome.
    async fn checkpoint(&self, name: &str) {
        if !self.plan.monitor_process || self.plan.expected_process.is_none() {
            return;
        }
        match self.sut.game_status().await {
            Ok(status) => match status.actual_game_process {
                Some(process) => info!(
                    "Process status at {}: {} (pid {}) cpu {:.1}% mem {:.1}%",
                    name, process.name, process.pid, process.cpu_percent, process.memory_percent
                ),
                None => warn!(
                    "Process {:?} not found at {}",
                    self.plan.expected_process, name
                ),
            },
            Err(e) => debug!("Could not get game status at {}: {}", name, e),
        }
    }
}

fn log_available_elements(elements: &[UiElement]) {
    if elements.is_empty() {
        info!("No UI elements detected");
        return;
    }
    info!("Available UI elements:");
    for (i, e) in elements.iter().enumerate() {
        info!(
            "  {}. Type: {}, Text: '{}'",
            i + 1,
            e.element_type,
            e.element_text
        );
    }
}
