//! Protocolo do dispositivo: payload JSON publicado via MQTT.
//!
//! Formato:
//!
//! ```json
//! {
//!   "soil_moisture": 45.5,
//!   "temperature": 28.3,
//!   "humidity": 65.2,
//!   "light_intensity": 15000.0,
//!   "timestamp": "2026-01-20T14:30:00Z"
//! }
//! ```
//!
//! O `timestamp` é opcional; sem ele a leitura recebe o instante atual.
//! Aceita RFC 3339 e ISO-8601 sem fuso (interpretado como UTC).

use crate::types::{Quantity, SensorReading};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tamanho máximo aceito para um payload.
pub const MAX_PAYLOAD_BYTES: usize = 4096;

/// Erros de validação de um payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Payload malformado: {0}")]
    MalformedPayload(String),

    #[error("{quantity} fora do domínio: {value}")]
    OutOfRange { quantity: Quantity, value: f64 },
}

#[derive(Deserialize)]
struct RawReading {
    soil_moisture: f64,
    temperature: f64,
    humidity: f64,
    light_intensity: f64,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Serialize)]
struct WireReading {
    soil_moisture: f64,
    temperature: f64,
    humidity: f64,
    light_intensity: f64,
    timestamp: String,
}

/// Decodifica e valida bytes recebidos em uma [`SensorReading`].
///
/// A checagem de domínio segue a ordem fixa soil_moisture, temperature,
/// humidity, light_intensity; o erro reporta a primeira violação.
pub fn validate(raw: &[u8]) -> Result<SensorReading, ValidationError> {
    if raw.len() > MAX_PAYLOAD_BYTES {
        return Err(ValidationError::MalformedPayload(format!(
            "payload com {} bytes (máximo {MAX_PAYLOAD_BYTES})",
            raw.len()
        )));
    }

    let parsed: RawReading = serde_json::from_slice(raw)
        .map_err(|e| ValidationError::MalformedPayload(e.to_string()))?;

    let timestamp = match parsed.timestamp.as_deref() {
        Some(ts) => parse_timestamp(ts)?,
        None => Utc::now(),
    };

    SensorReading::new(
        parsed.soil_moisture,
        parsed.temperature,
        parsed.humidity,
        parsed.light_intensity,
        timestamp,
    )
    .map_err(|(quantity, value)| ValidationError::OutOfRange { quantity, value })
}

fn parse_timestamp(ts: &str) -> Result<DateTime<Utc>, ValidationError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| ValidationError::MalformedPayload(format!("timestamp inválido '{ts}': {e}")))
}

/// Codifica uma leitura no formato publicado pelo dispositivo.
pub fn encode_reading(reading: &SensorReading) -> Vec<u8> {
    let wire = WireReading {
        soil_moisture: reading.soil_moisture(),
        temperature: reading.temperature(),
        humidity: reading.humidity(),
        light_intensity: reading.light_intensity(),
        timestamp: reading.timestamp().to_rfc3339(),
    };
    // Struct de f64 + String: a serialização não falha.
    serde_json::to_vec(&wire).unwrap_or_default()
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
