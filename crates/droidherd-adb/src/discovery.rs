//! Device discovery: parsing `adb devices -l` and `wm size` output

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Connection state as reported by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Unauthorized,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Unauthorized => "unauthorized",
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Task label assigned to a device. A label only: assignment does not start
/// work, the job coordinator does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceTask {
    #[default]
    None,
    DailyLogin,
    ReId,
}

impl DeviceTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::DailyLogin => "daily_login",
            Self::ReId => "re_id",
        }
    }
}

/// A known device, online or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub serial: String,
    pub status: DeviceStatus,
    /// (width, height) in device pixels, probed once per serial.
    pub screen_size: Option<(u32, u32)>,
    #[serde(default)]
    pub assigned_task: DeviceTask,
    #[serde(default)]
    pub is_running: bool,
}

impl Device {
    pub fn new(serial: impl Into<String>, status: DeviceStatus) -> Self {
        Self {
            serial: serial.into(),
            status,
            screen_size: None,
            assigned_task: DeviceTask::None,
            is_running: false,
        }
    }

    /// Screen size formatted as "WxH", or an empty string when unknown.
    pub fn screen_size_label(&self) -> String {
        match self.screen_size {
            Some((w, h)) => format!("{}x{}", w, h),
            None => String::new(),
        }
    }
}

/// Parse `adb devices -l` output into (serial, status) pairs.
///
/// The first line is the "List of devices attached" header; remaining lines
/// are `<serial> <state> [key:value ...]`.
pub fn parse_device_list(output: &str) -> Vec<(String, DeviceStatus)> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;

            let status = match state {
                "device" => DeviceStatus::Online,
                "unauthorized" => DeviceStatus::Unauthorized,
                _ => DeviceStatus::Offline,
            };
            Some((serial.to_string(), status))
        })
        .collect()
}

/// Parse `wm size` output into (width, height).
///
/// Output looks like `Physical size: 1080x1920`, optionally followed by an
/// `Override size:` line which, when present, is what input coordinates map
/// against and therefore wins.
pub fn parse_screen_size(output: &str) -> Option<(u32, u32)> {
    let pattern = Regex::new(r"(\d+)x(\d+)").expect("static regex");

    let mut physical = None;
    for line in output.lines() {
        let Some(captures) = pattern.captures(line) else {
            continue;
        };
        let (Ok(w), Ok(h)) = (captures[1].parse::<u32>(), captures[2].parse::<u32>()) else {
            continue;
        };
        if line.trim_start().starts_with("Override") {
            return Some((w, h));
        }
        physical.get_or_insert((w, h));
    }
    physical
}
