//! rumqttc client and event loop for the outgoing bus.

use super::Publisher;
use crate::config::MqttConfig;
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use log::{debug, error, info};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Time allowed for the DISCONNECT packet to go out on shutdown.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Connection to the broker. [`MqttBus::run`] must be driven for
/// publishes to go out.
pub struct MqttBus {
    client: AsyncClient,
    event_loop: EventLoop,
}

impl MqttBus {
    pub fn new(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.server, config.port);
        options.set_keep_alive(Duration::from_secs(30));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, 100);

        Self { client, event_loop }
    }

    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
        }
    }

    /// Drive the event loop until shutdown.
    ///
    /// A connection error ends the loop with [`BridgeError::BusDisconnection`].
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!("[MQTT] Starting event loop");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    self.disconnect().await;
                    return Ok(());
                }
                event = self.event_loop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!("[MQTT] Connected to broker ({:?})", ack.code);
                    }
                    Ok(event) => debug!("[MQTT] {:?}", event),
                    Err(e) => {
                        error!("[MQTT] Connection error: {}", e);
                        return Err(BridgeError::BusDisconnection(e.to_string()));
                    }
                },
            }
        }
    }

    async fn disconnect(&mut self) {
        info!("[MQTT] Disconnecting");
        if let Err(e) = self.client.disconnect().await {
            debug!("[MQTT] Disconnect request failed: {}", e);
            return;
        }

        let flush = async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_GRACE, flush).await.is_err() {
            debug!("[MQTT] Timed out waiting for disconnect");
        }
    }
}

/// Cloneable handle publishing through an [`MqttBus`].
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()> {
        debug!("[MQTT] Publishing to {}: {}", topic, payload);
        self.client
            .publish(topic, QoS::AtMostOnce, retain, payload.into_bytes())
            .await?;
        Ok(())
    }
}
