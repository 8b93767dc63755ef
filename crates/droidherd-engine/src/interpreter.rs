//! Workflow interpreter: executes one workflow against one device
//!
//! The interpreter is a match over the step tag. Observation steps
//! (template matching, color polling) work on screenshots rescaled to the
//! workflow's declared resolution; input steps map workflow coordinates back
//! to device-native pixels. Every wait and retry loop polls the cancellation
//! token, so a stop request interrupts the current step promptly.

use std::sync::Arc;

use tokio::time::Instant;

use droidherd_adb::DeviceChannel;
use droidherd_core::prelude::*;
use droidherd_core::{CancelToken, OnMatchAction, StepAction, Workflow, WorkflowStep};
use droidherd_vision::{best_match, match_all, Frame, TemplateStore};

use crate::settings::GameSettings;

/// Settle pauses after fire-and-forget inputs, so the next observation sees
/// the effect of the input.
const CLICK_SETTLE_SECS: f64 = 0.3;
const SWIPE_SETTLE_SECS: f64 = 0.5;
const BACK_SETTLE_SECS: f64 = 0.5;

/// Gap between force-stop and relaunch in `restart_game`.
const RESTART_GAP_SECS: f64 = 1.0;

/// Bound on nested `repeat_group` execution. Self-cycles are rejected at
/// load; this catches mutual cycles between disjoint groups.
const MAX_GROUP_DEPTH: usize = 8;

/// Target-application parameters the game steps need.
#[derive(Debug, Clone, Default)]
pub struct GameConfig {
    pub package: String,
    pub activity: Option<String>,
    pub cold_start_wait_secs: f64,
}

impl From<&GameSettings> for GameConfig {
    fn from(settings: &GameSettings) -> Self {
        Self {
            package: settings.package.clone(),
            activity: settings.activity_opt().map(|a| a.to_string()),
            cold_start_wait_secs: settings.cold_start_wait_secs,
        }
    }
}

/// Maps workflow-resolution coordinates onto the device's native pixels.
#[derive(Debug, Clone, Copy)]
struct ScreenScale {
    sx: f64,
    sy: f64,
}

impl ScreenScale {
    fn new(workflow: &Workflow, device_width: u32, device_height: u32) -> Self {
        Self {
            sx: device_width as f64 / workflow.screen_width.max(1) as f64,
            sy: device_height as f64 / workflow.screen_height.max(1) as f64,
        }
    }

    fn map(&self, x: i32, y: i32) -> (i32, i32) {
        (
            (x as f64 * self.sx).round() as i32,
            (y as f64 * self.sy).round() as i32,
        )
    }
}

/// Executes workflows step by step on a [`DeviceChannel`].
pub struct WorkflowInterpreter {
    templates: Arc<TemplateStore>,
    game: GameConfig,
}

impl WorkflowInterpreter {
    pub fn new(templates: Arc<TemplateStore>, game: GameConfig) -> Self {
        Self { templates, game }
    }

    pub fn templates(&self) -> &Arc<TemplateStore> {
        &self.templates
    }

    /// Load-time checks: structural validity plus template resolution.
    pub fn validate(&self, workflow: &Workflow) -> Result<()> {
        workflow.validate()?;
        for reference in workflow.template_refs() {
            if !self.templates.resolves(reference) {
                return Err(Error::template_not_found(reference));
            }
        }
        Ok(())
    }

    /// Run `workflow` to completion on `device`.
    ///
    /// Returns `Err(Error::Cancelled)` when the token fires, or
    /// `Err(Error::StepFailed)` when a step's observation contract is unmet
    /// within its budget.
    pub async fn run(
        &self,
        workflow: &Workflow,
        device: &DeviceChannel,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.validate(workflow)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (device_width, device_height) = device.screen_size().await?;
        let scale = ScreenScale::new(workflow, device_width, device_height);

        let mut steps = workflow.steps.clone();
        steps.sort_by_key(|s| s.order_index);

        info!(
            "[{}] running workflow '{}' ({} steps, {}x{} -> {}x{})",
            device.serial(),
            workflow.name,
            steps.len(),
            workflow.screen_width,
            workflow.screen_height,
            device_width,
            device_height
        );

        for step in &steps {
            if cancel.is_cancelled() {
                info!("[{}] workflow interrupted", device.serial());
                return Err(Error::Cancelled);
            }
            self.run_step(workflow, &steps, step, device, &scale, cancel, 0)
                .await?;
        }

        info!("[{}] workflow '{}' done", device.serial(), workflow.name);
        Ok(())
    }

    fn run_step<'a>(
        &'a self,
        workflow: &'a Workflow,
        all_steps: &'a [WorkflowStep],
        step: &'a WorkflowStep,
        device: &'a DeviceChannel,
        scale: &'a ScreenScale,
        cancel: &'a CancelToken,
        depth: usize,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.run_step_inner(workflow, all_steps, step, device, scale, cancel, depth))
    }

    async fn run_step_inner(
        &self,
        workflow: &Workflow,
        all_steps: &[WorkflowStep],
        step: &WorkflowStep,
        device: &DeviceChannel,
        scale: &ScreenScale,
        cancel: &CancelToken,
        depth: usize,
    ) -> Result<()> {
        trace!(
            "[{}] step {} ({})",
            device.serial(),
            step.order_index,
            step.action.step_type()
        );

        match &step.action {
            StepAction::Click { x, y } => {
                let (dx, dy) = scale.map(*x, *y);
                device.tap(dx, dy).await?;
                self.pause(cancel, CLICK_SETTLE_SECS).await
            }

            StepAction::Swipe {
                x,
                y,
                end_x,
                end_y,
                swipe_duration_ms,
            } => {
                let (dx, dy) = scale.map(*x, *y);
                let (dex, dey) = scale.map(*end_x, *end_y);
                device.swipe(dx, dy, dex, dey, *swipe_duration_ms).await?;
                self.pause(cancel, SWIPE_SETTLE_SECS).await
            }

            StepAction::Wait { wait_duration_ms } => {
                self.pause(cancel, *wait_duration_ms as f64 / 1000.0).await
            }

            StepAction::PressBack => {
                device.press_back().await?;
                self.pause(cancel, BACK_SETTLE_SECS).await
            }

            StepAction::StartGame => {
                let package = self.require_package(step)?;
                device
                    .launch_app(package, self.game.activity.as_deref())
                    .await?;
                self.pause(cancel, self.game.cold_start_wait_secs).await
            }

            StepAction::RestartGame => {
                let package = self.require_package(step)?;
                device.force_stop(package).await?;
                self.pause(cancel, RESTART_GAP_SECS).await?;
                device
                    .launch_app(package, self.game.activity.as_deref())
                    .await?;
                self.pause(cancel, self.game.cold_start_wait_secs).await
            }

            StepAction::WaitForColor {
                x,
                y,
                expected_color,
                tolerance,
                max_wait_seconds,
                check_interval,
            } => {
                self.wait_for_color(
                    workflow,
                    step,
                    device,
                    cancel,
                    (*x, *y),
                    *expected_color,
                    *tolerance,
                    *max_wait_seconds,
                    *check_interval,
                )
                .await
            }

            StepAction::ImageMatch {
                template_ref,
                threshold,
                max_wait_seconds,
                max_retries,
                retry_interval,
                skip_if_not_found,
                on_match_action,
            } => {
                self.image_match(
                    workflow,
                    step,
                    device,
                    scale,
                    cancel,
                    template_ref,
                    *threshold,
                    *max_wait_seconds,
                    *max_retries,
                    *retry_interval,
                    *skip_if_not_found,
                    *on_match_action,
                )
                .await
            }

            StepAction::FindAllClick {
                template_ref,
                threshold,
                match_all: tap_all,
            } => {
                let needle = self.templates.load(template_ref)?;
                let frame = self.observe(workflow, device).await?;

                let hits = if *tap_all {
                    match_all(&frame, &needle, *threshold)
                } else {
                    best_match(&frame, &needle, *threshold)
                        .into_iter()
                        .collect()
                };

                if hits.is_empty() {
                    // Not-found is non-fatal for this step.
                    debug!(
                        "[{}] '{}' not on screen, continuing",
                        device.serial(),
                        template_ref
                    );
                    return Ok(());
                }

                for hit in hits {
                    let (cx, cy) = hit.center(needle.width(), needle.height());
                    let (dx, dy) = scale.map(cx as i32, cy as i32);
                    device.tap(dx, dy).await?;
                    self.pause(cancel, CLICK_SETTLE_SECS).await?;
                }
                Ok(())
            }

            StepAction::LoopClick {
                template_ref,
                threshold,
                max_iterations,
                not_found_threshold,
                click_delay,
                retry_delay,
            } => {
                self.loop_click(
                    workflow,
                    device,
                    scale,
                    cancel,
                    template_ref,
                    *threshold,
                    *max_iterations,
                    *not_found_threshold,
                    *click_delay,
                    *retry_delay,
                )
                .await
            }

            StepAction::RepeatGroup {
                loop_group_name,
                stop_template_ref,
                stop_on_not_found,
                loop_max_iterations,
                threshold,
            } => {
                self.repeat_group(
                    workflow,
                    all_steps,
                    step,
                    device,
                    scale,
                    cancel,
                    depth,
                    loop_group_name,
                    stop_template_ref.as_deref(),
                    *stop_on_not_found,
                    *loop_max_iterations,
                    *threshold,
                )
                .await
            }
        }
    }

    // ─────────────────────────────────────────────────────────
    // Observation Steps
    // ─────────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn wait_for_color(
        &self,
        workflow: &Workflow,
        step: &WorkflowStep,
        device: &DeviceChannel,
        cancel: &CancelToken,
        (x, y): (i32, i32),
        expected: [u8; 3],
        tolerance: u8,
        max_wait_seconds: f64,
        check_interval: f64,
    ) -> Result<()> {
        let start = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let frame = self.observe(workflow, device).await?;
            if x < 0 || y < 0 {
                return Err(Error::step_failed(
                    step.order_index,
                    format!("sample position ({}, {}) out of bounds", x, y),
                ));
            }
            let pixel = frame.pixel(x as u32, y as u32).ok_or_else(|| {
                Error::step_failed(
                    step.order_index,
                    format!(
                        "sample position ({}, {}) outside {}x{} frame",
                        x,
                        y,
                        frame.width(),
                        frame.height()
                    ),
                )
            })?;

            let matched = pixel
                .iter()
                .zip(expected.iter())
                .all(|(have, want)| have.abs_diff(*want) <= tolerance);
            if matched {
                debug!(
                    "[{}] color matched at ({}, {}): {:?}",
                    device.serial(),
                    x,
                    y,
                    pixel
                );
                return Ok(());
            }

            if start.elapsed().as_secs_f64() >= max_wait_seconds {
                return Err(Error::step_failed(
                    step.order_index,
                    format!(
                        "color {:?} not seen at ({}, {}) within {}s (last {:?})",
                        expected, x, y, max_wait_seconds, pixel
                    ),
                ));
            }
            self.pause(cancel, check_interval).await?;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn image_match(
        &self,
        workflow: &Workflow,
        step: &WorkflowStep,
        device: &DeviceChannel,
        scale: &ScreenScale,
        cancel: &CancelToken,
        template_ref: &str,
        threshold: f32,
        max_wait_seconds: f64,
        max_retries: Option<u32>,
        retry_interval: f64,
        skip_if_not_found: bool,
        on_match_action: OnMatchAction,
    ) -> Result<()> {
        let needle = self.templates.load(template_ref)?;
        let start = Instant::now();
        let mut attempts: u32 = 0;

        let hit = loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            // Whichever budget fires first ends the search.
            if start.elapsed().as_secs_f64() >= max_wait_seconds {
                break None;
            }
            if let Some(limit) = max_retries {
                if attempts >= limit {
                    break None;
                }
            }

            attempts += 1;
            let frame = self.observe(workflow, device).await?;
            if let Some(hit) = best_match(&frame, &needle, threshold) {
                break Some(hit);
            }
            self.pause(cancel, retry_interval).await?;
        };

        match hit {
            Some(hit) => {
                debug!(
                    "[{}] '{}' found at ({}, {}) conf={:.3} after {} attempt(s)",
                    device.serial(),
                    template_ref,
                    hit.x,
                    hit.y,
                    hit.confidence,
                    attempts
                );
                if on_match_action == OnMatchAction::TapCenter {
                    let (cx, cy) = hit.center(needle.width(), needle.height());
                    let (dx, dy) = scale.map(cx as i32, cy as i32);
                    device.tap(dx, dy).await?;
                    self.pause(cancel, CLICK_SETTLE_SECS).await?;
                }
                Ok(())
            }
            None if skip_if_not_found => {
                info!(
                    "[{}] '{}' not found, skipping step {}",
                    device.serial(),
                    template_ref,
                    step.order_index
                );
                Ok(())
            }
            None => Err(Error::step_failed(
                step.order_index,
                format!(
                    "template '{}' not found after {} attempt(s) / {:.1}s",
                    template_ref,
                    attempts,
                    start.elapsed().as_secs_f64()
                ),
            )),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn loop_click(
        &self,
        workflow: &Workflow,
        device: &DeviceChannel,
        scale: &ScreenScale,
        cancel: &CancelToken,
        template_ref: &str,
        threshold: f32,
        max_iterations: u32,
        not_found_threshold: u32,
        click_delay: f64,
        retry_delay: f64,
    ) -> Result<()> {
        let needle = self.templates.load(template_ref)?;
        let mut not_found: u32 = 0;
        let mut taps: u32 = 0;

        for iteration in 1..=max_iterations {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let frame = self.observe(workflow, device).await?;
            match best_match(&frame, &needle, threshold) {
                Some(hit) => {
                    let (cx, cy) = hit.center(needle.width(), needle.height());
                    let (dx, dy) = scale.map(cx as i32, cy as i32);
                    device.tap(dx, dy).await?;
                    taps += 1;
                    not_found = 0;
                    self.pause(cancel, click_delay).await?;
                }
                None => {
                    not_found += 1;
                    debug!(
                        "[{}] '{}' not found ({}/{})",
                        device.serial(),
                        template_ref,
                        not_found,
                        not_found_threshold
                    );
                    if not_found >= not_found_threshold {
                        debug!(
                            "[{}] loop_click done: {} tap(s) in {} iteration(s)",
                            device.serial(),
                            taps,
                            iteration
                        );
                        return Ok(());
                    }
                    self.pause(cancel, retry_delay).await?;
                }
            }
        }

        warn!(
            "[{}] loop_click hit max iterations ({}) with {} tap(s)",
            device.serial(),
            max_iterations,
            taps
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn repeat_group(
        &self,
        workflow: &Workflow,
        all_steps: &[WorkflowStep],
        step: &WorkflowStep,
        device: &DeviceChannel,
        scale: &ScreenScale,
        cancel: &CancelToken,
        depth: usize,
        group_name: &str,
        stop_template_ref: Option<&str>,
        stop_on_not_found: bool,
        loop_max_iterations: u32,
        threshold: f32,
    ) -> Result<()> {
        if depth >= MAX_GROUP_DEPTH {
            return Err(Error::step_failed(
                step.order_index,
                format!("group nesting deeper than {}", MAX_GROUP_DEPTH),
            ));
        }

        let group: Vec<&WorkflowStep> = all_steps
            .iter()
            .filter(|s| s.group_name.as_deref() == Some(group_name))
            .collect();
        if group.is_empty() {
            warn!(
                "[{}] repeat_group: no steps in group '{}'",
                device.serial(),
                group_name
            );
            return Ok(());
        }

        let stop_needle = match stop_template_ref {
            Some(reference) => Some(self.templates.load(reference)?),
            None => None,
        };

        let mut completed = 0u32;
        for _ in 0..loop_max_iterations {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            // Stop condition is evaluated before each iteration.
            if let Some(needle) = &stop_needle {
                let frame = self.observe(workflow, device).await?;
                let found = best_match(&frame, needle, threshold).is_some();
                let should_stop = if stop_on_not_found { !found } else { found };
                if should_stop {
                    debug!(
                        "[{}] repeat_group '{}' stop condition met after {} iteration(s)",
                        device.serial(),
                        group_name,
                        completed
                    );
                    return Ok(());
                }
            }

            for member in &group {
                self.run_step(workflow, all_steps, member, device, scale, cancel, depth + 1)
                    .await?;
            }
            completed += 1;
        }

        debug!(
            "[{}] repeat_group '{}' finished after {} iteration(s)",
            device.serial(),
            group_name,
            completed
        );
        Ok(())
    }

    // ─────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────

    /// Screenshot rescaled to the workflow's declared resolution.
    async fn observe(&self, workflow: &Workflow, device: &DeviceChannel) -> Result<Frame> {
        let frame = device.screenshot().await?;
        if frame.width() == workflow.screen_width && frame.height() == workflow.screen_height {
            Ok(frame)
        } else {
            Ok(frame.resize(workflow.screen_width, workflow.screen_height))
        }
    }

    /// Cancel-aware sleep; `Err(Cancelled)` when interrupted.
    async fn pause(&self, cancel: &CancelToken, secs: f64) -> Result<()> {
        if cancel.wait_secs(secs).await {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    fn require_package(&self, step: &WorkflowStep) -> Result<&str> {
        if self.game.package.is_empty() {
            Err(Error::step_failed(
                step.order_index,
                "no target package configured ([game].package)",
            ))
        } else {
            Ok(&self.game.package)
        }
    }
}
