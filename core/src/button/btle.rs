//! Real Bluetooth LE driver, compiled behind the `btle` feature.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::adapter::{
    AdapterError, ButtonAdapter, ButtonLink, DiscoveredDevice, RawNotification,
};
use super::policy::DeviceFilter;

const NOTIFICATION_BUFFER: usize = 32;

/// `btleplug`-backed driver over the first system adapter.
pub struct BtleAdapter {
    adapter: Adapter,
}

impl BtleAdapter {
    pub async fn new() -> Result<Self, AdapterError> {
        let manager = Manager::new()
            .await
            .map_err(|e| AdapterError::Unavailable(e.to_string()))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| AdapterError::Unavailable(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::Unavailable("no bluetooth adapter".into()))?;
        Ok(Self { adapter })
    }

    async fn find_peripheral(&self, device: &DiscoveredDevice) -> Result<Peripheral, AdapterError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| AdapterError::Connect(e.to_string()))?;
        peripherals
            .into_iter()
            .find(|p| format!("{:?}", p.id()) == device.device_id)
            .ok_or_else(|| AdapterError::Connect(format!("peripheral {} gone", device.device_id)))
    }
}

#[async_trait]
impl ButtonAdapter for BtleAdapter {
    async fn ready(&self) -> bool {
        self.adapter.adapter_info().await.is_ok()
    }

    async fn discover(
        &self,
        filter: &DeviceFilter,
        window: Duration,
    ) -> Result<Option<DiscoveredDevice>, AdapterError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| AdapterError::Discovery(e.to_string()))?;
        let mut events = match self.adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                let _ = self.adapter.stop_scan().await;
                return Err(AdapterError::Discovery(e.to_string()));
            }
        };

        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        let found = loop {
            let event = tokio::select! {
                _ = &mut deadline => break None,
                event = events.next() => match event {
                    Some(event) => event,
                    None => break None,
                },
            };
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };
            let Ok(peripheral) = self.adapter.peripheral(&id).await else {
                continue;
            };
            let name = peripheral
                .properties()
                .await
                .ok()
                .flatten()
                .and_then(|props| props.local_name);
            if filter.matches(name.as_deref()) {
                break Some(DiscoveredDevice {
                    device_id: format!("{:?}", id),
                    name,
                });
            }
            debug!(name = ?name, "nearby device did not qualify");
        };

        let _ = self.adapter.stop_scan().await;
        Ok(found)
    }

    async fn attach(
        &self,
        device: &DiscoveredDevice,
        preferred: Option<&str>,
        timeout: Duration,
    ) -> Result<ButtonLink, AdapterError> {
        let peripheral = self.find_peripheral(device).await?;

        tokio::time::timeout(timeout, async {
            peripheral
                .connect()
                .await
                .map_err(|e| AdapterError::Connect(e.to_string()))?;
            peripheral
                .discover_services()
                .await
                .map_err(|e| AdapterError::Connect(e.to_string()))?;
            Ok::<(), AdapterError>(())
        })
        .await
        .map_err(|_| AdapterError::Connect(format!("timed out after {:?}", timeout)))??;

        let characteristics = peripheral.characteristics();
        let preferred_match = preferred.and_then(|want| {
            characteristics
                .iter()
                .find(|c| c.uuid.to_string().eq_ignore_ascii_case(want))
                .cloned()
        });
        let chosen = match preferred_match {
            Some(c) => c,
            None => {
                // Firmware variance: the expected characteristic is absent on
                // some revisions, so fall back to the first notifiable one.
                let fallback = characteristics
                    .iter()
                    .find(|c| c.properties.contains(CharPropFlags::NOTIFY))
                    .cloned()
                    .ok_or_else(|| {
                        AdapterError::NoCharacteristic(
                            device.name.clone().unwrap_or_else(|| device.device_id.clone()),
                        )
                    })?;
                info!(
                    characteristic = %fallback.uuid,
                    "preferred characteristic absent, using first notifiable"
                );
                fallback
            }
        };

        peripheral
            .subscribe(&chosen)
            .await
            .map_err(|e| AdapterError::Subscribe(e.to_string()))?;
        let mut stream = peripheral
            .notifications()
            .await
            .map_err(|e| AdapterError::Subscribe(e.to_string()))?;

        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let subscribed = chosen.uuid;
        tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != subscribed {
                    continue;
                }
                let raw = RawNotification {
                    payload: notification.value,
                };
                if tx.send(raw).await.is_err() {
                    break;
                }
            }
            if let Err(e) = peripheral.disconnect().await {
                warn!(error = %e, "peripheral release failed");
            }
        });

        Ok(ButtonLink {
            characteristic: subscribed.to_string(),
            notifications: rx,
        })
    }
}
