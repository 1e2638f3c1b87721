use serde::Deserialize;
use std::collections::HashSet;

/// Links an internal field key to a feed column label and its display metadata
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldDescriptor {
    pub field: String,
    pub column: String,
    pub name: String,
    #[serde(default)]
    pub device_class: String,
    #[serde(default)]
    pub unit: String,
}

impl FieldDescriptor {
    pub fn new(field: &str, column: &str, name: &str, device_class: &str, unit: &str) -> Self {
        Self {
            field: field.to_string(),
            column: column.to_string(),
            name: name.to_string(),
            device_class: device_class.to_string(),
            unit: unit.to_string(),
        }
    }
}

/// Column layout of the GeoSphere Austria TAWES "aktuelle Messwerte" CSV
pub fn default_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::new("station", "Station", "Station", "", ""),
        FieldDescriptor::new("name", "Name", "Name", "", ""),
        FieldDescriptor::new("height_above_sea_level", "Höhe m", "Seehöhe", "", "m"),
        FieldDescriptor::new("date", "Datum", "Datum", "date", ""),
        FieldDescriptor::new("time", "Zeit", "Zeit", "timestamp", ""),
        FieldDescriptor::new("temperature", "T °C", "Temperature", "temperature", "°C"),
        FieldDescriptor::new("dewpoint", "TP °C", "Dewpoint", "temperature", "°C"),
        FieldDescriptor::new("humidity", "RF %", "Relative Humidity", "humidity", "%"),
        FieldDescriptor::new(
            "wind_direction",
            "WR °",
            "Avg. Wind Direction",
            "signal_strength",
            "°",
        ),
        FieldDescriptor::new(
            "wind_speed",
            "WG km/h",
            "Avg. Wind Speed",
            "signal_strength",
            "km/h",
        ),
        FieldDescriptor::new("peak_wind_direction", "WSR °", "Peak Wind Direction", "", "°"),
        FieldDescriptor::new("peak_wind_speed", "WSG km/h", "Peak Wind Speed", "", "km/h"),
        // Field key kept as published so existing Home Assistant entities keep their ids
        FieldDescriptor::new("percipitation", "N l/m²", "Percipitation", "humidity", "l/m²"),
        FieldDescriptor::new(
            "relative_pressure",
            "LDred hPa",
            "Relative Pressure",
            "pressure",
            "hPa",
        ),
        FieldDescriptor::new(
            "absolute_pressure",
            "LDstat hPa",
            "Absolute Pressure",
            "pressure",
            "hPa",
        ),
        FieldDescriptor::new("sunshine", "SO %", "Sunshine per hour", "illuminance", "%"),
    ]
}

/// Fields needed to read the feed but never published as sensors
pub fn default_exclusions() -> Vec<String> {
    [
        "station",
        "name",
        "height_above_sea_level",
        "date",
        "time",
        "peak_wind_direction",
        "peak_wind_speed",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Ordered field descriptors plus the set of keys that are never published
#[derive(Debug, Clone)]
pub struct FieldTable {
    fields: Vec<FieldDescriptor>,
    excluded: HashSet<String>,
}

impl FieldTable {
    pub fn new<I>(fields: Vec<FieldDescriptor>, excluded: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            fields,
            excluded: excluded.into_iter().collect(),
        }
    }

    pub fn is_excluded(&self, field: &str) -> bool {
        self.excluded.contains(field)
    }

    /// Non-excluded descriptors, in table order
    pub fn publishable(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|d| !self.is_excluded(&d.field))
    }

    pub fn get(&self, field: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|d| d.field == field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Default for FieldTable {
    fn default() -> Self {
        Self::new(default_fields(), default_exclusions())
    }
}

/// One feed row as column label -> raw value, in header order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    values: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new(values: Vec<(String, String)>) -> Self {
        Self { values }
    }

    /// Value under `column`; a label repeated in the header resolves to its
    /// last occurrence
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values
            .iter()
            .rev()
            .find(|(label, _)| label == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

/// Field key -> raw value for one station, in field table order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    values: Vec<(String, String)>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the value for `field`
    pub fn insert(&mut self, field: &str, value: &str) {
        match self.values.iter_mut().find(|(key, _)| key == field) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.values.push((field.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(key, _)| key == field)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
