//! Definição de tipos/structs do domínio Smart Crop.
//!
//! Leituras validadas, thresholds, candidatos e alertas. Nenhuma
//! [`SensorReading`] existe fora do domínio físico: a construção passa
//! sempre por [`SensorReading::new`] ou pelo validador do protocolo.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ──────────────────────────────────────────────
// Grandezas monitoradas
// ──────────────────────────────────────────────

/// Grandeza física monitorada pelo dispositivo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    SoilMoisture,
    Temperature,
    Humidity,
    LightIntensity,
}

impl Quantity {
    /// Ordem fixa de validação e avaliação.
    pub const ALL: [Quantity; 4] = [
        Quantity::SoilMoisture,
        Quantity::Temperature,
        Quantity::Humidity,
        Quantity::LightIntensity,
    ];

    /// Nome do campo no payload JSON.
    pub fn key(self) -> &'static str {
        match self {
            Quantity::SoilMoisture => "soil_moisture",
            Quantity::Temperature => "temperature",
            Quantity::Humidity => "humidity",
            Quantity::LightIntensity => "light_intensity",
        }
    }

    /// Rótulo legível (mensagens e e-mails).
    pub fn label(self) -> &'static str {
        match self {
            Quantity::SoilMoisture => "Umidade do solo",
            Quantity::Temperature => "Temperatura",
            Quantity::Humidity => "Umidade do ar",
            Quantity::LightIntensity => "Luminosidade",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Quantity::SoilMoisture | Quantity::Humidity => "%",
            Quantity::Temperature => "°C",
            Quantity::LightIntensity => " lux",
        }
    }

    /// Domínio físico aceito (inclusivo).
    pub fn domain(self) -> (f64, f64) {
        match self {
            Quantity::SoilMoisture | Quantity::Humidity => (0.0, 100.0),
            Quantity::Temperature => (-50.0, 100.0),
            Quantity::LightIntensity => (0.0, 100_000.0),
        }
    }

    pub fn in_domain(self, value: f64) -> bool {
        let (lo, hi) = self.domain();
        value.is_finite() && value >= lo && value <= hi
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ──────────────────────────────────────────────
// Leitura
// ──────────────────────────────────────────────

/// Uma leitura completa e validada do dispositivo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    soil_moisture: f64,
    temperature: f64,
    humidity: f64,
    light_intensity: f64,
    timestamp: DateTime<Utc>,
}

impl SensorReading {
    /// Constrói uma leitura checando cada campo na ordem fixa de
    /// [`Quantity::ALL`]. Retorna a primeira grandeza fora do domínio.
    pub fn new(
        soil_moisture: f64,
        temperature: f64,
        humidity: f64,
        light_intensity: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, (Quantity, f64)> {
        let values = [soil_moisture, temperature, humidity, light_intensity];
        for (quantity, value) in Quantity::ALL.into_iter().zip(values) {
            if !quantity.in_domain(value) {
                return Err((quantity, value));
            }
        }
        Ok(Self {
            soil_moisture,
            temperature,
            humidity,
            light_intensity,
            timestamp,
        })
    }

    pub fn soil_moisture(&self) -> f64 {
        self.soil_moisture
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    pub fn light_intensity(&self) -> f64 {
        self.light_intensity
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Valor medido para a grandeza.
    pub fn value(&self, quantity: Quantity) -> f64 {
        match quantity {
            Quantity::SoilMoisture => self.soil_moisture,
            Quantity::Temperature => self.temperature,
            Quantity::Humidity => self.humidity,
            Quantity::LightIntensity => self.light_intensity,
        }
    }
}

// ──────────────────────────────────────────────
// Thresholds
// ──────────────────────────────────────────────

/// Faixa aceitável de uma grandeza.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// Limites configurados pelo operador. `None` = grandeza não configurada
/// (o avaliador não gera nada para ela).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub soil_moisture: Option<Bounds>,
    pub temperature: Option<Bounds>,
    pub humidity: Option<Bounds>,
    pub light_intensity: Option<Bounds>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            soil_moisture: Some(Bounds::new(30.0, 70.0)),
            temperature: Some(Bounds::new(15.0, 35.0)),
            humidity: Some(Bounds::new(40.0, 80.0)),
            light_intensity: Some(Bounds::new(5000.0, 50000.0)),
        }
    }
}

impl ThresholdConfig {
    /// Configuração sem nenhuma grandeza monitorada.
    pub fn unconfigured() -> Self {
        Self {
            soil_moisture: None,
            temperature: None,
            humidity: None,
            light_intensity: None,
        }
    }

    pub fn bounds(&self, quantity: Quantity) -> Option<Bounds> {
        match quantity {
            Quantity::SoilMoisture => self.soil_moisture,
            Quantity::Temperature => self.temperature,
            Quantity::Humidity => self.humidity,
            Quantity::LightIntensity => self.light_intensity,
        }
    }

    /// Lista de erros (min > max, limites fora do domínio físico).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for quantity in Quantity::ALL {
            let Some(b) = self.bounds(quantity) else {
                continue;
            };
            if b.min > b.max {
                errors.push(format!("{quantity}: min {} > max {}", b.min, b.max));
            }
            if !quantity.in_domain(b.min) || !quantity.in_domain(b.max) {
                let (lo, hi) = quantity.domain();
                errors.push(format!("{quantity}: limites fora do domínio ({lo}–{hi})"));
            }
        }
        errors
    }
}

/// Destino das notificações por e-mail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub email: String,
    pub enabled: bool,
}

impl NotificationSettings {
    /// Destino utilizável: habilitado e com endereço.
    pub fn destination(&self) -> Option<&str> {
        let email = self.email.trim();
        (self.enabled && !email.is_empty()).then_some(email)
    }
}

/// Snapshot das configurações do sistema servido pelo armazenamento.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    pub thresholds: ThresholdConfig,
    pub notification: NotificationSettings,
}

// ──────────────────────────────────────────────
// Alertas
// ──────────────────────────────────────────────

/// Direção da violação.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Low,
    High,
}

/// Severidade de um alerta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tipo de alerta: grandeza + direção (ex: `soil_moisture_low`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlertType {
    pub quantity: Quantity,
    pub direction: Direction,
}

impl AlertType {
    pub fn new(quantity: Quantity, direction: Direction) -> Self {
        Self { quantity, direction }
    }

    pub fn as_string(self) -> String {
        let suffix = match self.direction {
            Direction::Low => "low",
            Direction::High => "high",
        };
        format!("{}_{}", self.quantity.key(), suffix)
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl Serialize for AlertType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.as_string())
    }
}

impl<'de> Deserialize<'de> for AlertType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        let (key, direction) = if let Some(k) = raw.strip_suffix("_low") {
            (k, Direction::Low)
        } else if let Some(k) = raw.strip_suffix("_high") {
            (k, Direction::High)
        } else {
            return Err(serde::de::Error::custom(format!("tipo de alerta inválido: {raw}")));
        };
        let quantity = Quantity::ALL
            .into_iter()
            .find(|q| q.key() == key)
            .ok_or_else(|| serde::de::Error::custom(format!("grandeza desconhecida: {key}")))?;
        Ok(AlertType::new(quantity, direction))
    }
}

/// Violação candidata produzida pelo avaliador (nunca persistida).
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    pub quantity: Quantity,
    pub direction: Direction,
    pub measured: f64,
    pub threshold: f64,
    pub severity: Severity,
}

impl AlertCandidate {
    pub fn alert_type(&self) -> AlertType {
        AlertType::new(self.quantity, self.direction)
    }
}

/// Identificador atribuído pelo armazenamento.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub String);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Alerta registrado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AlertId>,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub measured: f64,
    pub threshold: f64,
    pub raised_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notified: bool,
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_rejects_first_field_out_of_domain() {
        let now = Utc::now();
        assert_eq!(
            SensorReading::new(101.0, 500.0, 50.0, 100.0, now),
            Err((Quantity::SoilMoisture, 101.0))
        );
        assert_eq!(
            SensorReading::new(50.0, -51.0, 150.0, 100.0, now),
            Err((Quantity::Temperature, -51.0))
        );
    }

    #[test]
    fn reading_accepts_domain_edges() {
        let now = Utc::now();
        assert!(SensorReading::new(0.0, -50.0, 0.0, 0.0, now).is_ok());
        assert!(SensorReading::new(100.0, 100.0, 100.0, 100_000.0, now).is_ok());
    }

    #[test]
    fn nan_is_out_of_domain() {
        assert!(!Quantity::Humidity.in_domain(f64::NAN));
    }

    #[test]
    fn alert_type_string_roundtrip() {
        let t = AlertType::new(Quantity::LightIntensity, Direction::High);
        assert_eq!(t.as_string(), "light_intensity_high");
        let json = serde_json::to_string(&t).unwrap();
        let back: AlertType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
        assert!(serde_json::from_str::<AlertType>("\"wind_low\"").is_err());
    }

    #[test]
    fn default_thresholds_are_valid() {
        assert!(ThresholdConfig::default().validate().is_empty());
    }

    #[test]
    fn inverted_bounds_are_reported() {
        let cfg = ThresholdConfig {
            humidity: Some(Bounds::new(90.0, 10.0)),
            ..ThresholdConfig::default()
        };
        let errors = cfg.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("humidity"));
    }

    #[test]
    fn destination_requires_enabled_and_address() {
        let mut n = NotificationSettings {
            email: "farmer@example.com".into(),
            enabled: false,
        };
        assert_eq!(n.destination(), None);
        n.enabled = true;
        assert_eq!(n.destination(), Some("farmer@example.com"));
        n.email = "  ".into();
        assert_eq!(n.destination(), None);
    }
}
