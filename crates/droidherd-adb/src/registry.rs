//! Device registry: discovery, status tracking, and task labels
//!
//! The registry polls the bridge for attached serials, probes screen
//! geometry for devices it has not measured yet, and publishes
//! online/offline transitions on the status bus. Entries for offline
//! serials are retained until explicitly removed so that a rebooting
//! emulator keeps its task assignment.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use droidherd_core::prelude::*;
use droidherd_core::{CancelToken, StatusBus, StatusEvent};

use crate::channel::DeviceChannel;
use crate::commands::BridgeCommand;
use crate::discovery::{parse_device_list, parse_screen_size, Device, DeviceStatus, DeviceTask};
use crate::transport::BridgeTransport;

/// Default interval between bridge polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Tracks every device the bridge has ever reported this session.
pub struct DeviceRegistry {
    transport: Arc<dyn BridgeTransport>,
    retry_limit: u32,
    bus: StatusBus,
    devices: Mutex<HashMap<String, Device>>,
}

impl DeviceRegistry {
    pub fn new(transport: Arc<dyn BridgeTransport>, retry_limit: u32, bus: StatusBus) -> Self {
        Self {
            transport,
            retry_limit: retry_limit.max(1),
            bus,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Poll the bridge once and reconcile the device map.
    pub async fn refresh(&self) -> Result<Vec<Device>> {
        let output = self.transport.run("", &BridgeCommand::Devices).await?;
        if !output.success() {
            return Err(Error::bridge(format!(
                "device listing failed: {}",
                output.stderr.trim_end()
            )));
        }

        let listed = parse_device_list(&output.stdout_utf8());

        // Probe geometry outside the lock; only for online serials we have
        // not measured yet.
        let need_probe: Vec<String> = {
            let devices = self.devices.lock().expect("registry lock");
            listed
                .iter()
                .filter(|(serial, status)| {
                    status.is_online()
                        && devices
                            .get(serial)
                            .map_or(true, |d| d.screen_size.is_none())
                })
                .map(|(serial, _)| serial.clone())
                .collect()
        };

        let mut probed: HashMap<String, (u32, u32)> = HashMap::new();
        for serial in need_probe {
            match self.probe_screen_size(&serial).await {
                Ok(size) => {
                    probed.insert(serial, size);
                }
                Err(e) => {
                    warn!("[{}] screen size probe failed: {}", serial, e);
                }
            }
        }

        let mut transitions = Vec::new();
        let snapshot = {
            let mut devices = self.devices.lock().expect("registry lock");

            for (serial, status) in &listed {
                let entry = devices
                    .entry(serial.clone())
                    .or_insert_with(|| Device::new(serial.clone(), DeviceStatus::Offline));

                let was_online = entry.status.is_online();
                entry.status = *status;
                if let Some(size) = probed.get(serial) {
                    entry.screen_size = Some(*size);
                }

                match (was_online, status.is_online()) {
                    (false, true) => transitions.push(StatusEvent::DeviceOnline {
                        serial: serial.clone(),
                    }),
                    (true, false) => transitions.push(StatusEvent::DeviceOffline {
                        serial: serial.clone(),
                    }),
                    _ => {}
                }
            }

            // Serials the bridge no longer reports have gone away.
            let listed_serials: Vec<&String> = listed.iter().map(|(s, _)| s).collect();
            for (serial, device) in devices.iter_mut() {
                if !listed_serials.contains(&serial) && device.status.is_online() {
                    device.status = DeviceStatus::Offline;
                    transitions.push(StatusEvent::DeviceOffline {
                        serial: serial.clone(),
                    });
                }
            }

            sorted_snapshot(&devices)
        };

        for event in transitions {
            self.bus.publish(event);
        }

        debug!("registry refresh: {} device(s) known", snapshot.len());
        Ok(snapshot)
    }

    async fn probe_screen_size(&self, serial: &str) -> Result<(u32, u32)> {
        let output = self
            .transport
            .run(serial, &BridgeCommand::ScreenSize)
            .await?;
        parse_screen_size(&output.stdout_utf8())
            .ok_or_else(|| Error::protocol("unparseable wm size output"))
    }

    /// Current view of every known device, sorted by serial.
    pub fn snapshot(&self) -> Vec<Device> {
        sorted_snapshot(&self.devices.lock().expect("registry lock"))
    }

    pub fn get(&self, serial: &str) -> Option<Device> {
        self.devices
            .lock()
            .expect("registry lock")
            .get(serial)
            .cloned()
    }

    pub fn is_online(&self, serial: &str) -> bool {
        self.get(serial).map_or(false, |d| d.status.is_online())
    }

    /// Attach a task label. Labels do not start work.
    pub fn assign_task(&self, serial: &str, task: DeviceTask) -> bool {
        let mut devices = self.devices.lock().expect("registry lock");
        match devices.get_mut(serial) {
            Some(device) => {
                device.assigned_task = task;
                info!("[{}] assigned task {}", serial, task.as_str());
                true
            }
            None => {
                warn!("[{}] cannot assign task: unknown serial", serial);
                false
            }
        }
    }

    pub fn set_running(&self, serial: &str, is_running: bool) {
        if let Some(device) = self
            .devices
            .lock()
            .expect("registry lock")
            .get_mut(serial)
        {
            device.is_running = is_running;
        }
    }

    /// Force a device offline (bridge loss observed by a channel).
    pub fn mark_offline(&self, serial: &str) {
        let was_online = {
            let mut devices = self.devices.lock().expect("registry lock");
            match devices.get_mut(serial) {
                Some(device) if device.status.is_online() => {
                    device.status = DeviceStatus::Offline;
                    true
                }
                _ => false,
            }
        };

        if was_online {
            warn!("[{}] marked offline after bridge failure", serial);
            self.bus.publish(StatusEvent::DeviceOffline {
                serial: serial.to_string(),
            });
        }
    }

    /// Drop a serial from the registry entirely.
    pub fn remove(&self, serial: &str) -> bool {
        self.devices
            .lock()
            .expect("registry lock")
            .remove(serial)
            .is_some()
    }

    /// Open a command channel for a serial, wired back to this registry for
    /// offline marking.
    pub fn channel(self: &Arc<Self>, serial: &str) -> DeviceChannel {
        DeviceChannel::open_with_registry(
            serial,
            Arc::clone(&self.transport),
            self.retry_limit,
            Arc::clone(self),
        )
    }

    pub fn transport(&self) -> Arc<dyn BridgeTransport> {
        Arc::clone(&self.transport)
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Background poll loop. Runs until the token is cancelled.
    pub fn spawn_poller(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancelToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            info!("device poller started ({}s interval)", interval.as_secs());
            loop {
                if let Err(e) = registry.refresh().await {
                    warn!("device poll failed: {}", e);
                }
                if cancel.wait(interval).await {
                    break;
                }
            }
            info!("device poller stopped");
        })
    }
}

fn sorted_snapshot(devices: &HashMap<String, Device>) -> Vec<Device> {
    let mut snapshot: Vec<Device> = devices.values().cloned().collect();
    snapshot.sort_by(|a, b| a.serial.cmp(&b.serial));
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedTransport;
    use crate::transport::CommandOutput;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn listing(lines: &[(&str, &str)]) -> String {
        let mut out = String::from("List of devices attached\n");
        for (serial, state) in lines {
            out.push_str(&format!("{}\t{}\n", serial, state));
        }
        out
    }

    fn registry_with(transport: Arc<ScriptedTransport>) -> Arc<DeviceRegistry> {
        Arc::new(DeviceRegistry::new(transport, 3, StatusBus::new()))
    }

    fn scripted_bridge(devices: &'static [(&'static str, &'static str)]) -> Arc<ScriptedTransport> {
        ScriptedTransport::new(move |_, command| match command {
            BridgeCommand::Devices => Ok(CommandOutput::ok_text(listing(devices))),
            BridgeCommand::ScreenSize => {
                Ok(CommandOutput::ok_text("Physical size: 960x540\n"))
            }
            _ => Ok(CommandOutput::ok_text("")),
        })
    }

    #[tokio::test]
    async fn test_refresh_discovers_devices() {
        let transport = scripted_bridge(&[("emulator-5554", "device"), ("emulator-5556", "offline")]);
        let registry = registry_with(transport);

        let devices = registry.refresh().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert!(registry.is_online("emulator-5554"));
        assert!(!registry.is_online("emulator-5556"));
        assert_eq!(
            registry.get("emulator-5554").unwrap().screen_size,
            Some((960, 540))
        );
        // Offline devices are not probed.
        assert_eq!(registry.get("emulator-5556").unwrap().screen_size, None);
    }

    #[tokio::test]
    async fn test_refresh_emits_transitions() {
        let phase = Arc::new(AtomicUsize::new(0));
        let phase_clone = phase.clone();
        let transport = ScriptedTransport::new(move |_, command| match command {
            BridgeCommand::Devices => {
                let listing = if phase_clone.load(Ordering::SeqCst) == 0 {
                    listing(&[("emulator-5554", "device")])
                } else {
                    listing(&[])
                };
                Ok(CommandOutput::ok_text(listing))
            }
            _ => Ok(CommandOutput::ok_text("Physical size: 960x540\n")),
        });

        let bus = StatusBus::new();
        let mut events = bus.subscribe();
        let registry = Arc::new(DeviceRegistry::new(transport, 3, bus));

        registry.refresh().await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            StatusEvent::DeviceOnline { .. }
        ));

        phase.store(1, Ordering::SeqCst);
        registry.refresh().await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            StatusEvent::DeviceOffline { .. }
        ));

        // The entry is retained even though the bridge no longer lists it.
        assert!(registry.get("emulator-5554").is_some());
    }

    #[tokio::test]
    async fn test_task_assignment_is_a_label() {
        let transport = scripted_bridge(&[("emulator-5554", "device")]);
        let registry = registry_with(transport);
        registry.refresh().await.unwrap();

        assert!(registry.assign_task("emulator-5554", DeviceTask::DailyLogin));
        assert_eq!(
            registry.get("emulator-5554").unwrap().assigned_task,
            DeviceTask::DailyLogin
        );
        assert!(!registry.get("emulator-5554").unwrap().is_running);

        assert!(!registry.assign_task("nope", DeviceTask::ReId));
    }

    #[tokio::test]
    async fn test_assignment_survives_offline_transition() {
        let phase = Arc::new(AtomicUsize::new(0));
        let phase_clone = phase.clone();
        let transport = ScriptedTransport::new(move |_, command| match command {
            BridgeCommand::Devices => {
                let listing = if phase_clone.load(Ordering::SeqCst) == 0 {
                    listing(&[("emulator-5554", "device")])
                } else {
                    listing(&[("emulator-5554", "offline")])
                };
                Ok(CommandOutput::ok_text(listing))
            }
            _ => Ok(CommandOutput::ok_text("Physical size: 960x540\n")),
        });
        let registry = registry_with(transport);

        registry.refresh().await.unwrap();
        registry.assign_task("emulator-5554", DeviceTask::ReId);

        phase.store(1, Ordering::SeqCst);
        registry.refresh().await.unwrap();

        let device = registry.get("emulator-5554").unwrap();
        assert_eq!(device.status, DeviceStatus::Offline);
        assert_eq!(device.assigned_task, DeviceTask::ReId);
    }

    #[tokio::test]
    async fn test_mark_offline_publishes_once() {
        let transport = scripted_bridge(&[("emulator-5554", "device")]);
        let bus = StatusBus::new();
        let registry = Arc::new(DeviceRegistry::new(transport, 3, bus.clone()));
        registry.refresh().await.unwrap();

        let mut events = bus.subscribe();
        registry.mark_offline("emulator-5554");
        registry.mark_offline("emulator-5554");

        assert!(matches!(
            events.recv().await.unwrap(),
            StatusEvent::DeviceOffline { .. }
        ));
        assert!(events.try_recv().is_err(), "second mark must not re-publish");
        assert!(!registry.is_online("emulator-5554"));
    }

    #[tokio::test]
    async fn test_remove_drops_entry() {
        let transport = scripted_bridge(&[("emulator-5554", "device")]);
        let registry = registry_with(transport);
        registry.refresh().await.unwrap();

        assert!(registry.remove("emulator-5554"));
        assert!(registry.get("emulator-5554").is_none());
        assert!(!registry.remove("emulator-5554"));
    }

    #[tokio::test]
    async fn test_snapshot_sorted_by_serial() {
        let transport = scripted_bridge(&[("b-serial", "device"), ("a-serial", "device")]);
        let registry = registry_with(transport);
        registry.refresh().await.unwrap();

        let serials: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|d| d.serial)
            .collect();
        assert_eq!(serials, vec!["a-serial", "b-serial"]);
    }

    #[tokio::test]
    async fn test_poller_stops_on_cancel() {
        let transport = scripted_bridge(&[("emulator-5554", "device")]);
        let registry = registry_with(transport);
        let cancel = CancelToken::new();

        let handle = registry.spawn_poller(Duration::from_millis(10), cancel.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller must stop promptly")
            .unwrap();
        assert!(registry.is_online("emulator-5554"));
    }
}
