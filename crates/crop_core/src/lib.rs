//! # Crop Core
//!
//! Crate compartilhada do Smart Crop: tipos do domínio, validação do
//! payload publicado pelo dispositivo, avaliação de thresholds, políticas
//! de severidade, renderização de notificações e configuração TOML.
//!
//! ## Módulos
//! - [`types`] – Leituras, thresholds, candidatos e alertas
//! - [`protocol`] – Validação/codificação do payload JSON
//! - [`alerts`] – Avaliação, severidade e aceitação de alertas
//! - [`render`] – Assunto, texto e HTML das notificações
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod protocol;
pub mod alerts;
pub mod render;
pub mod config;

// Re-exports convenientes
pub use types::{Alert, AlertCandidate, SensorReading, SystemSettings, ThresholdConfig};
pub use protocol::{validate, encode_reading, ValidationError};
pub use alerts::{evaluate, AlertTracker, DedupPolicy};
pub use config::AppConfig;
