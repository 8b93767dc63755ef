//! Workflow model: an ordered program of typed steps
//!
//! A workflow is authored against a fixed screen resolution and executed by
//! the interpreter against one device. Steps are a tagged sum serialized with
//! `step_type` as the discriminant, matching the wire contract used by the
//! workflow editor.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Default authoring resolution for new workflows.
pub const DEFAULT_SCREEN_WIDTH: u32 = 960;
pub const DEFAULT_SCREEN_HEIGHT: u32 = 540;

/// A workflow: metadata plus its ordered steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub id: Option<i64>,

    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_screen_width")]
    pub screen_width: u32,

    #[serde(default = "default_screen_height")]
    pub screen_height: u32,

    /// At most one workflow is the master. Enforced by the repository.
    #[serde(default)]
    pub is_master: bool,

    /// Game mode this workflow is assigned to (e.g. "daily-login").
    #[serde(default)]
    pub mode_name: Option<String>,

    /// Month the workflow is valid for, "YYYY-MM".
    #[serde(default)]
    pub month_year: Option<String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

fn default_screen_width() -> u32 {
    DEFAULT_SCREEN_WIDTH
}

fn default_screen_height() -> u32 {
    DEFAULT_SCREEN_HEIGHT
}

/// One step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub order_index: usize,

    #[serde(default)]
    pub description: String,

    /// Label assigning this step to a group that a `repeat_group` step can
    /// drive. Groups are labels, not blocks: a labelled step reached through
    /// linear execution still runs as a normal step.
    #[serde(default)]
    pub group_name: Option<String>,

    #[serde(flatten)]
    pub action: StepAction,
}

/// What to do when `image_match` finds its template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnMatchAction {
    #[default]
    TapCenter,
    None,
}

/// Typed step payloads, discriminated by `step_type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step_type", rename_all = "snake_case")]
pub enum StepAction {
    Click {
        x: i32,
        y: i32,
    },
    Swipe {
        x: i32,
        y: i32,
        end_x: i32,
        end_y: i32,
        #[serde(default = "default_swipe_duration_ms")]
        swipe_duration_ms: u64,
    },
    Wait {
        wait_duration_ms: u64,
    },
    WaitForColor {
        x: i32,
        y: i32,
        /// Expected pixel value as [B, G, R]. Persisted JSON may carry this
        /// as a string, so deserialization accepts both forms.
        #[serde(
            default = "default_expected_color",
            deserialize_with = "deserialize_bgr"
        )]
        expected_color: [u8; 3],
        #[serde(default = "default_tolerance")]
        tolerance: u8,
        #[serde(default = "default_color_max_wait")]
        max_wait_seconds: f64,
        #[serde(default = "default_check_interval")]
        check_interval: f64,
    },
    ImageMatch {
        template_ref: String,
        #[serde(default = "default_threshold")]
        threshold: f32,
        #[serde(default = "default_match_max_wait")]
        max_wait_seconds: f64,
        #[serde(default)]
        max_retries: Option<u32>,
        #[serde(default = "default_retry_interval")]
        retry_interval: f64,
        #[serde(default)]
        skip_if_not_found: bool,
        #[serde(default)]
        on_match_action: OnMatchAction,
    },
    FindAllClick {
        template_ref: String,
        #[serde(default = "default_threshold")]
        threshold: f32,
        #[serde(default)]
        match_all: bool,
    },
    LoopClick {
        template_ref: String,
        #[serde(default = "default_threshold")]
        threshold: f32,
        #[serde(default = "default_loop_click_iterations")]
        max_iterations: u32,
        #[serde(default = "default_not_found_threshold")]
        not_found_threshold: u32,
        #[serde(default = "default_click_delay")]
        click_delay: f64,
        #[serde(default = "default_retry_delay")]
        retry_delay: f64,
    },
    RepeatGroup {
        loop_group_name: String,
        #[serde(default)]
        stop_template_ref: Option<String>,
        #[serde(default = "default_stop_on_not_found")]
        stop_on_not_found: bool,
        #[serde(default = "default_group_iterations")]
        loop_max_iterations: u32,
        #[serde(default = "default_threshold")]
        threshold: f32,
    },
    PressBack,
    StartGame,
    RestartGame,
}

fn default_swipe_duration_ms() -> u64 {
    300
}
fn default_expected_color() -> [u8; 3] {
    [255, 255, 255]
}
fn default_tolerance() -> u8 {
    30
}
fn default_color_max_wait() -> f64 {
    30.0
}
fn default_check_interval() -> f64 {
    1.0
}
fn default_threshold() -> f32 {
    0.8
}
fn default_match_max_wait() -> f64 {
    10.0
}
fn default_retry_interval() -> f64 {
    1.0
}
fn default_loop_click_iterations() -> u32 {
    20
}
fn default_not_found_threshold() -> u32 {
    3
}
fn default_click_delay() -> f64 {
    1.5
}
fn default_retry_delay() -> f64 {
    2.0
}
fn default_stop_on_not_found() -> bool {
    true
}
fn default_group_iterations() -> u32 {
    100
}

/// Accept `[b, g, r]` either as a JSON array or as a stringified array.
fn deserialize_bgr<'de, D>(deserializer: D) -> std::result::Result<[u8; 3], D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Values(Vec<i64>),
        Text(String),
    }

    let values = match Raw::deserialize(deserializer)? {
        Raw::Values(v) => v,
        Raw::Text(s) => {
            serde_json::from_str::<Vec<i64>>(&s).map_err(serde::de::Error::custom)?
        }
    };

    if values.len() != 3 {
        return Err(serde::de::Error::custom(format!(
            "expected 3 color channels, got {}",
            values.len()
        )));
    }

    let mut bgr = [0u8; 3];
    for (slot, value) in bgr.iter_mut().zip(values) {
        *slot = value.clamp(0, 255) as u8;
    }
    Ok(bgr)
}

impl StepAction {
    /// Wire name of this step type.
    pub fn step_type(&self) -> &'static str {
        match self {
            Self::Click { .. } => "click",
            Self::Swipe { .. } => "swipe",
            Self::Wait { .. } => "wait",
            Self::WaitForColor { .. } => "wait_for_color",
            Self::ImageMatch { .. } => "image_match",
            Self::FindAllClick { .. } => "find_all_click",
            Self::LoopClick { .. } => "loop_click",
            Self::RepeatGroup { .. } => "repeat_group",
            Self::PressBack => "press_back",
            Self::StartGame => "start_game",
            Self::RestartGame => "restart_game",
        }
    }

    /// Template reference used by this step, if any.
    pub fn template_refs(&self) -> Vec<&str> {
        match self {
            Self::ImageMatch { template_ref, .. }
            | Self::FindAllClick { template_ref, .. }
            | Self::LoopClick { template_ref, .. } => vec![template_ref.as_str()],
            Self::RepeatGroup {
                stop_template_ref: Some(stop),
                ..
            } => vec![stop.as_str()],
            _ => Vec::new(),
        }
    }
}

impl Workflow {
    /// Create an empty workflow at the default resolution.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            name: name.into(),
            description: String::new(),
            screen_width: DEFAULT_SCREEN_WIDTH,
            screen_height: DEFAULT_SCREEN_HEIGHT,
            is_master: false,
            mode_name: None,
            month_year: None,
            created_at: Some(now),
            updated_at: Some(now),
            steps: Vec::new(),
        }
    }

    /// Steps carrying the given group label, in order-index order.
    pub fn steps_in_group(&self, group: &str) -> Vec<&WorkflowStep> {
        let mut steps: Vec<&WorkflowStep> = self
            .steps
            .iter()
            .filter(|s| s.group_name.as_deref() == Some(group))
            .collect();
        steps.sort_by_key(|s| s.order_index);
        steps
    }

    /// All template references used anywhere in the workflow.
    pub fn template_refs(&self) -> Vec<&str> {
        self.steps
            .iter()
            .flat_map(|s| s.action.template_refs())
            .collect()
    }

    /// Validate the structural invariants checked at load time.
    ///
    /// - `order_index` contiguous from 0
    /// - every `repeat_group` references an existing group
    /// - a `repeat_group` must not reference its own containing group
    pub fn validate(&self) -> Result<()> {
        let mut indices: Vec<usize> = self.steps.iter().map(|s| s.order_index).collect();
        indices.sort_unstable();
        for (expected, actual) in indices.iter().enumerate() {
            if *actual != expected {
                return Err(Error::workflow_invalid(format!(
                    "step order_index values must be contiguous from 0, found {} where {} was expected",
                    actual, expected
                )));
            }
        }

        for step in &self.steps {
            if let StepAction::RepeatGroup {
                loop_group_name, ..
            } = &step.action
            {
                if loop_group_name.is_empty() {
                    return Err(Error::workflow_invalid(format!(
                        "repeat_group at index {} has an empty loop_group_name",
                        step.order_index
                    )));
                }

                if step.group_name.as_deref() == Some(loop_group_name.as_str()) {
                    return Err(Error::workflow_invalid(format!(
                        "repeat_group at index {} drives its own group '{}'",
                        step.order_index, loop_group_name
                    )));
                }

                let group_exists = self
                    .steps
                    .iter()
                    .any(|s| s.group_name.as_deref() == Some(loop_group_name.as_str()));
                if !group_exists {
                    return Err(Error::workflow_invalid(format!(
                        "repeat_group at index {} references unknown group '{}'",
                        step.order_index, loop_group_name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Stamp `updated_at` with the current time.
    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

/// The current month in the device-local calendar, "YYYY-MM".
pub fn month_year_now() -> String {
    Local::now().format("%Y-%m").to_string()
}
