//! Home Assistant MQTT discovery and state publishing

pub mod payload;
pub mod publisher;

pub use payload::{
    coerce_number, config_topic, discovery_messages, state_message, unique_id, value_template,
    DiscoveryPayload, OutboundMessage, StatePayload,
};
pub use publisher::{ConnectionState, MqttPublisher};
