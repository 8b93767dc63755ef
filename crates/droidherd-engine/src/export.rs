//! Account export: pull the on-device account file into dated local copies

use std::path::{Path, PathBuf};

use chrono::Local;

use droidherd_adb::DeviceChannel;
use droidherd_core::prelude::*;

/// Pulls account state files off devices into an output folder.
pub struct AccountExporter {
    remote_path: String,
    out_dir: PathBuf,
}

impl AccountExporter {
    pub fn new(remote_path: impl Into<String>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            remote_path: remote_path.into(),
            out_dir: out_dir.into(),
        }
    }

    /// Pull the account file from one device. The local name is
    /// `<serial>_<YYYYmmdd>.xml`, suffixed when it already exists.
    pub async fn export(&self, channel: &DeviceChannel) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.out_dir)?;

        let bytes = channel.pull(&self.remote_path).await?;
        if bytes.is_empty() {
            return Err(Error::validation(format!(
                "{} pulled empty account file from {}",
                channel.serial(),
                self.remote_path
            )));
        }

        let stem = format!(
            "{}_{}",
            sanitize(channel.serial()),
            Local::now().format("%Y%m%d")
        );
        let destination = unique_path(&self.out_dir, &stem);
        std::fs::write(&destination, &bytes)?;

        info!(
            "[{}] exported account file to {}",
            channel.serial(),
            destination.display()
        );
        Ok(destination)
    }

    /// Export from several devices, one at a time. Failures are reported per
    /// device rather than aborting the batch.
    pub async fn export_all(
        &self,
        channels: &[DeviceChannel],
    ) -> Vec<(String, Result<PathBuf>)> {
        let mut results = Vec::with_capacity(channels.len());
        for channel in channels {
            let outcome = self.export(channel).await;
            if let Err(e) = &outcome {
                warn!("[{}] export failed: {}", channel.serial(), e);
            }
            results.push((channel.serial().to_string(), outcome));
        }
        results
    }
}

/// Serials may contain characters that do not belong in filenames
/// (e.g. `192.168.1.20:5555`).
fn sanitize(serial: &str) -> String {
    serial
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn unique_path(dir: &Path, stem: &str) -> PathBuf {
    let candidate = dir.join(format!("{}.xml", stem));
    if !candidate.exists() {
        return candidate;
    }
    for n in 2.. {
        let candidate = dir.join(format!("{}_{}.xml", stem, n));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!("counter exhausted")
}
