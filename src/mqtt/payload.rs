use crate::config::MqttConfig;
use crate::error::Result;
use crate::models::{FieldDescriptor, FieldTable, Snapshot};
use rumqttc::QoS;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use tracing::debug;

/// Entity id used by Home Assistant, e.g. `tawes_weather_temperature`
pub fn unique_id(id_prefix: &str, field: &str) -> String {
    format!("{}{}", id_prefix, field)
}

pub fn config_topic(base_topic: &str, unique_id: &str) -> String {
    format!("{}{}/config", base_topic, unique_id)
}

/// Jinja expression Home Assistant evaluates against the state message
pub fn value_template(unique_id: &str) -> String {
    format!("{{{{ value_json.{}}}}}", unique_id)
}

/// Coerce a raw feed value: integer first, then float with `,` read as the
/// decimal separator. Anything else (including NaN/inf) yields `None`.
pub fn coerce_number(raw: &str) -> Option<Number> {
    let trimmed = raw.trim();

    if let Ok(int) = trimmed.parse::<i64>() {
        return Some(Number::from(int));
    }

    trimmed
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
}

/// Discovery config for one sensor, serialized in this field order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryPayload {
    pub device_class: String,
    pub name: String,
    pub state_topic: String,
    pub unit_of_measurement: String,
    pub value_template: String,
    pub unique_id: String,
}

impl DiscoveryPayload {
    pub fn new(config: &MqttConfig, descriptor: &FieldDescriptor) -> Self {
        let unique_id = unique_id(&config.id_prefix, &descriptor.field);

        Self {
            device_class: descriptor.device_class.clone(),
            name: format!("{} {}", descriptor.name, config.name_suffix),
            state_topic: config.state_topic(),
            unit_of_measurement: descriptor.unit.clone(),
            value_template: value_template(&unique_id),
            unique_id,
        }
    }
}

/// Flat `unique_id -> number` map published to the state topic
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StatePayload(Map<String, Value>);

impl StatePayload {
    pub fn from_snapshot(snapshot: &Snapshot, id_prefix: &str) -> Self {
        let mut values = Map::new();

        for (field, raw) in snapshot.iter() {
            match coerce_number(raw) {
                Some(number) => {
                    values.insert(unique_id(id_prefix, field), Value::Number(number));
                }
                None => {
                    debug!("Dropping {} from state payload: '{}' is not numeric", field, raw);
                }
            }
        }

        Self(values)
    }

    pub fn get(&self, unique_id: &str) -> Option<&Value> {
        self.0.get(unique_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

/// One discovery message per publishable field, in field table order
pub fn discovery_messages(
    config: &MqttConfig,
    table: &FieldTable,
) -> Result<Vec<OutboundMessage>> {
    table
        .publishable()
        .map(|descriptor| -> Result<OutboundMessage> {
            let payload = DiscoveryPayload::new(config, descriptor);
            Ok(OutboundMessage {
                topic: config_topic(&config.base_topic, &payload.unique_id),
                payload: serde_json::to_string(&payload)?,
                qos: config.qos(),
                retain: config.retain,
            })
        })
        .collect()
}

pub fn state_message(config: &MqttConfig, snapshot: &Snapshot) -> Result<OutboundMessage> {
    let payload = StatePayload::from_snapshot(snapshot, &config.id_prefix);

    Ok(OutboundMessage {
        topic: config.state_topic(),
        payload: serde_json::to_string(&payload)?,
        qos: config.qos(),
        retain: config.retain,
    })
}
