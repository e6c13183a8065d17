//! Typed stream records
//!
//! Raw stream entries are flat string maps. They are validated into
//! [`Reading`] or [`Alert`] once, at decode time, and the rest of the engine
//! only ever sees the typed form.

use std::collections::HashMap;

use serde::Serialize;

use crate::constants::STATISTICAL_ANOMALY_TYPE;
use crate::error::DecodeError;
use crate::logic::baseline::Baseline;

// ============================================================================
// READING
// ============================================================================

/// One sensor measurement as published by a producer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub device_id: String,
    /// Producer wall-clock, fractional seconds since epoch
    pub timestamp: f64,
    pub temperature: f64,
    pub humidity: Option<f64>,
}

impl Reading {
    /// Decode an input entry delivered on `topic`
    pub fn decode(topic: &str, fields: &HashMap<String, String>) -> Result<Self, DecodeError> {
        let timestamp = required_number(fields, "timestamp")?;
        let temperature = required_number(fields, "temperature_c")?;

        // Optional and unused by detection: a bad value is dropped, not fatal
        let humidity = fields
            .get("humidity_percent")
            .or_else(|| fields.get("humidity"))
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|h| h.is_finite());

        Ok(Self {
            device_id: device_id_for(topic, fields),
            timestamp,
            temperature,
            humidity,
        })
    }

    /// Timestamp in whole milliseconds (truncated)
    pub fn timestamp_ms(&self) -> i64 {
        (self.timestamp * 1000.0).trunc() as i64
    }
}

/// Device identity for an entry: the topic's last `:` segment, else the
/// entry's own `device_id` field, else the whole topic name.
pub fn device_id_for(topic: &str, fields: &HashMap<String, String>) -> String {
    match topic.rsplit_once(':') {
        Some((_, suffix)) if !suffix.is_empty() => suffix.to_string(),
        _ => fields
            .get("device_id")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(topic)
            .to_string(),
    }
}

// ============================================================================
// ALERT
// ============================================================================

/// Detection rule that produced an alert
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertKind {
    /// Reading fell outside the rolling baseline band
    StatisticalAnomaly {
        moving_average: f64,
        standard_deviation: f64,
    },
    /// Older alert records carrying only a type tag
    Legacy { tag: String },
}

/// Immutable alert record appended to the alert stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub device_id: String,
    #[serde(flatten)]
    pub kind: AlertKind,
    pub temp_reading: f64,
    /// Originating reading's timestamp in milliseconds
    pub timestamp: i64,
}

impl Alert {
    /// Alert for a reading that broke its baseline band
    pub fn statistical(reading: &Reading, baseline: &Baseline) -> Self {
        Self {
            device_id: reading.device_id.clone(),
            kind: AlertKind::StatisticalAnomaly {
                moving_average: baseline.mean,
                standard_deviation: baseline.std_dev,
            },
            temp_reading: reading.temperature,
            timestamp: reading.timestamp_ms(),
        }
    }

    /// Value of the `type` field
    pub fn type_tag(&self) -> &str {
        match &self.kind {
            AlertKind::StatisticalAnomaly { .. } => STATISTICAL_ANOMALY_TYPE,
            AlertKind::Legacy { tag } => tag,
        }
    }

    /// Field map as written to the alert stream
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("device_id".to_string(), self.device_id.clone()),
            ("type".to_string(), self.type_tag().to_string()),
            ("temp_reading".to_string(), self.temp_reading.to_string()),
        ];
        if let AlertKind::StatisticalAnomaly { moving_average, standard_deviation } = &self.kind {
            fields.push(("moving_average".to_string(), moving_average.to_string()));
            fields.push(("standard_deviation".to_string(), standard_deviation.to_string()));
        }
        fields.push(("timestamp".to_string(), self.timestamp.to_string()));
        fields
    }

    /// Decode an entry read back from the alert stream
    pub fn decode(fields: &HashMap<String, String>) -> Result<Self, DecodeError> {
        let device_id = fields
            .get("device_id")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(DecodeError::MissingField("device_id"))?;
        let tag = fields
            .get("type")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(DecodeError::MissingField("type"))?;
        let temp_reading = required_number(fields, "temp_reading")?;
        let timestamp = required_number(fields, "timestamp")?.trunc() as i64;

        let kind = if tag == STATISTICAL_ANOMALY_TYPE {
            AlertKind::StatisticalAnomaly {
                moving_average: required_number(fields, "moving_average")?,
                standard_deviation: required_number(fields, "standard_deviation")?,
            }
        } else {
            AlertKind::Legacy { tag }
        };

        Ok(Self {
            device_id,
            kind,
            temp_reading,
            timestamp,
        })
    }
}

fn required_number(fields: &HashMap<String, String>, field: &'static str) -> Result<f64, DecodeError> {
    let raw = fields.get(field).ok_or(DecodeError::MissingField(field))?;
    let value: f64 = raw.trim().parse().map_err(|_| DecodeError::NotANumber {
        field,
        value: raw.clone(),
    })?;
    if !value.is_finite() {
        return Err(DecodeError::NotFinite { field, value });
    }
    Ok(value)
}
