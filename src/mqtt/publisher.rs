use crate::config::MqttConfig;
use crate::error::{AppError, Result};
use crate::mqtt::payload::OutboundMessage;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const MIN_REQUEST_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Publishing,
}

/// One broker connection, opened for a single publish pass and then closed
pub struct MqttPublisher {
    client: AsyncClient,
    eventloop: EventLoop,
    state: ConnectionState,
    timeout: Duration,
    broker: String,
}

impl MqttPublisher {
    /// Connect and wait for CONNACK.
    ///
    /// `capacity` should cover every message the caller will queue so that
    /// `publish_all` never blocks on a full request channel.
    pub async fn connect(config: &MqttConfig, capacity: usize) -> Result<Self> {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options
            .set_keep_alive(Duration::from_secs(config.keep_alive_seconds))
            .set_clean_session(true);

        // +1 for the DISCONNECT request
        let (client, eventloop) =
            AsyncClient::new(options, capacity.saturating_add(1).max(MIN_REQUEST_CAPACITY));

        let mut publisher = Self {
            client,
            eventloop,
            state: ConnectionState::Disconnected,
            timeout: config.connect_timeout(),
            broker: format!("{}:{}", config.host, config.port),
        };

        publisher.transition(ConnectionState::Connecting);
        debug!("Connecting to MQTT broker {}", publisher.broker);

        let wait = publisher.timeout;
        match timeout(wait, publisher.wait_for_connack()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                publisher.transition(ConnectionState::Disconnected);
                return Err(e);
            }
            Err(_) => {
                publisher.transition(ConnectionState::Disconnected);
                return Err(AppError::Timeout(format!(
                    "no CONNACK from MQTT broker {} within {:?}",
                    publisher.broker, wait
                )));
            }
        }

        publisher.transition(ConnectionState::Connected);
        info!("Connected to MQTT broker {}", publisher.broker);
        Ok(publisher)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Queue every message, then drive the event loop until each one has
    /// been written and, for QoS 1/2, acknowledged by the broker.
    pub async fn publish_all(&mut self, messages: &[OutboundMessage]) -> Result<()> {
        self.transition(ConnectionState::Publishing);

        let result = self.publish_and_flush(messages).await;

        self.transition(ConnectionState::Connected);
        result
    }

    /// Send DISCONNECT and wait for it to leave the socket
    pub async fn disconnect(mut self) -> Result<()> {
        let requested = self.client.disconnect().await;

        if requested.is_ok() {
            loop {
                match timeout(self.timeout, self.eventloop.poll()).await {
                    Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => break,
                    Ok(Ok(_)) => continue,
                    Ok(Err(e)) => {
                        debug!("Connection closed while disconnecting: {}", e);
                        break;
                    }
                    Err(_) => {
                        warn!("Timed out sending DISCONNECT to {}", self.broker);
                        break;
                    }
                }
            }
        }

        self.transition(ConnectionState::Disconnected);
        requested?;
        Ok(())
    }

    async fn wait_for_connack(&mut self) -> Result<()> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        return Ok(());
                    }
                    return Err(AppError::ConnectionRefused(format!("{:?}", ack.code)));
                }
                Ok(event) => debug!("Event while waiting for CONNACK: {:?}", event),
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return Err(AppError::ConnectionRefused(format!("{:?}", code)));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn publish_and_flush(&mut self, messages: &[OutboundMessage]) -> Result<()> {
        let mut expected_acks = 0usize;

        for message in messages {
            debug!(
                "Publishing {} bytes to {} (qos {:?}, retain {})",
                message.payload.len(),
                message.topic,
                message.qos,
                message.retain
            );

            self.client
                .publish(
                    message.topic.clone(),
                    message.qos,
                    message.retain,
                    message.payload.clone().into_bytes(),
                )
                .await?;

            if message.qos != QoS::AtMostOnce {
                expected_acks += 1;
            }
        }

        let mut written = 0usize;
        let mut acked = 0usize;

        while written < messages.len() || acked < expected_acks {
            let event = timeout(self.timeout, self.eventloop.poll())
                .await
                .map_err(|_| {
                    AppError::Timeout(format!(
                        "publishing to {}: {}/{} written, {}/{} acknowledged",
                        self.broker,
                        written,
                        messages.len(),
                        acked,
                        expected_acks
                    ))
                })??;

            match event {
                Event::Outgoing(Outgoing::Publish(_)) => written += 1,
                Event::Incoming(Packet::PubAck(_)) | Event::Incoming(Packet::PubComp(_)) => {
                    acked += 1
                }
                other => debug!("MQTT event: {:?}", other),
            }
        }

        info!(
            "Published {} messages to {} ({} acknowledged)",
            written, self.broker, acked
        );
        Ok(())
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!("MQTT connection state: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}
