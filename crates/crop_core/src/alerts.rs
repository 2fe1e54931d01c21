//! Sistema de alertas – avaliação de thresholds, severidade e aceitação.
//!
//! [`evaluate`] é puro: mesma leitura + mesmos limites, mesma lista de
//! candidatos, sempre na ordem de [`Quantity::ALL`]. O [`AlertTracker`]
//! transforma candidatos em [`Alert`]s conforme a [`DedupPolicy`].

use crate::types::{
    Alert, AlertCandidate, AlertType, Direction, Quantity, SensorReading, Severity,
    ThresholdConfig,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Margem acima do máximo a partir da qual temperatura alta é crítica.
pub const TEMPERATURE_CRITICAL_MARGIN: f64 = 5.0;

// ──────────────────────────────────────────────
// Políticas de severidade
// ──────────────────────────────────────────────

pub fn soil_moisture_severity(_direction: Direction, _measured: f64, _threshold: f64) -> Severity {
    Severity::Warning
}

/// Alta crítica quando excede o máximo em mais de
/// [`TEMPERATURE_CRITICAL_MARGIN`] (ex: limite 35, valor > 40).
pub fn temperature_severity(direction: Direction, measured: f64, threshold: f64) -> Severity {
    match direction {
        Direction::High if measured - threshold > TEMPERATURE_CRITICAL_MARGIN => Severity::Critical,
        _ => Severity::Warning,
    }
}

pub fn humidity_severity(direction: Direction, _measured: f64, _threshold: f64) -> Severity {
    match direction {
        Direction::Low => Severity::Info,
        Direction::High => Severity::Warning,
    }
}

pub fn light_intensity_severity(direction: Direction, _measured: f64, _threshold: f64) -> Severity {
    match direction {
        Direction::Low => Severity::Info,
        Direction::High => Severity::Warning,
    }
}

/// Seleciona a política da grandeza.
pub fn severity_for(quantity: Quantity, direction: Direction, measured: f64, threshold: f64) -> Severity {
    let policy: fn(Direction, f64, f64) -> Severity = match quantity {
        Quantity::SoilMoisture => soil_moisture_severity,
        Quantity::Temperature => temperature_severity,
        Quantity::Humidity => humidity_severity,
        Quantity::LightIntensity => light_intensity_severity,
    };
    policy(direction, measured, threshold)
}

// ──────────────────────────────────────────────
// Avaliação
// ──────────────────────────────────────────────

/// Avalia uma leitura contra os thresholds e retorna os candidatos.
///
/// No máximo um candidato por grandeza (abaixo do mínimo tem precedência).
/// Grandezas sem limites configurados não geram nada.
pub fn evaluate(reading: &SensorReading, thresholds: &ThresholdConfig) -> Vec<AlertCandidate> {
    let mut candidates = Vec::new();

    for quantity in Quantity::ALL {
        let Some(bounds) = thresholds.bounds(quantity) else {
            continue;
        };
        let value = reading.value(quantity);

        let (direction, threshold) = if value < bounds.min {
            (Direction::Low, bounds.min)
        } else if value > bounds.max {
            (Direction::High, bounds.max)
        } else {
            continue;
        };

        candidates.push(AlertCandidate {
            quantity,
            direction,
            measured: value,
            threshold,
            severity: severity_for(quantity, direction, value, threshold),
        });
    }

    candidates
}

// ──────────────────────────────────────────────
// Aceitação
// ──────────────────────────────────────────────

/// Política de deduplicação de alertas repetidos.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Todo candidato vira alerta, mesmo com violação persistente.
    #[default]
    Always,
    /// Descarta o candidato se já existe alerta não resolvido do mesmo tipo.
    SuppressWhileActive,
}

/// Decide quais candidatos viram alertas.
#[derive(Debug, Clone, Default)]
pub struct AlertTracker {
    policy: DedupPolicy,
}

impl AlertTracker {
    pub fn new(policy: DedupPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> DedupPolicy {
        self.policy
    }

    /// Indica se [`accept`](Self::accept) consulta os alertas não resolvidos.
    pub fn needs_unresolved(&self) -> bool {
        self.policy == DedupPolicy::SuppressWhileActive
    }

    /// Converte candidatos em alertas novos, todos com o mesmo `raised_at`.
    pub fn accept(&self, candidates: &[AlertCandidate], current_unresolved: &[Alert]) -> Vec<Alert> {
        let active: HashSet<AlertType> = match self.policy {
            DedupPolicy::Always => HashSet::new(),
            DedupPolicy::SuppressWhileActive => current_unresolved
                .iter()
                .filter(|a| !a.resolved)
                .map(|a| a.alert_type)
                .collect(),
        };

        let now = Utc::now();
        candidates
            .iter()
            .filter(|c| !active.contains(&c.alert_type()))
            .map(|c| Alert {
                id: None,
                alert_type: c.alert_type(),
                severity: c.severity,
                message: alert_message(c),
                measured: c.measured,
                threshold: c.threshold,
                raised_at: now,
                resolved: false,
                resolved_at: None,
                notified: false,
            })
            .collect()
    }
}

/// Mensagem curta do alerta (ex: "Umidade do solo (25%) abaixo do mínimo (30%)").
pub fn alert_message(c: &AlertCandidate) -> String {
    let unit = c.quantity.unit();
    let relation = match c.direction {
        Direction::Low => "abaixo do mínimo",
        Direction::High => "acima do máximo",
    };
    format!(
        "{} ({}{unit}) {relation} ({}{unit})",
        c.quantity.label(),
        c.measured,
        c.threshold
    )
}
