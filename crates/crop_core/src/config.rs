//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável atende o ingest e o
//! simulador. Segredos podem vir do ambiente (`SMTP_USERNAME`,
//! `SMTP_PASSWORD`, `MQTT_BROKER`), que têm precedência sobre o arquivo.

use crate::alerts::DedupPolicy;
use crate::types::SystemSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Conexão com o broker MQTT.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    /// Tópico onde o dispositivo publica as leituras
    pub topic: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Tempo máximo para a primeira conexão no startup
    pub connect_timeout_secs: u64,
    /// Pausa entre tentativas de reconexão
    pub reconnect_delay_secs: f64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "broker.hivemq.com".into(),
            port: 1883,
            topic: "smart_crop/sensors".into(),
            client_id: "smart_crop_backend".into(),
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
            reconnect_delay_secs: 2.0,
        }
    }
}

/// Fila de trabalho e workers do pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacidade da fila (mensagens excedentes são descartadas)
    pub queue_capacity: usize,
    pub workers: usize,
    /// Espera máxima pelos workers no encerramento
    pub shutdown_timeout_secs: f64,
    pub dedup: DedupPolicy,
    /// Intervalo do log de status (0 = desligado)
    pub status_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            workers: 4,
            shutdown_timeout_secs: 10.0,
            dedup: DedupPolicy::Always,
            status_interval_secs: 60,
        }
    }
}

/// Armazenamento local.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Diretório de dados (relativo ao config.toml quando não absoluto)
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".into(),
        }
    }
}

/// Relay SMTP para notificações. `host` vazio desliga o envio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
    pub timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".into(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from_email: String::new(),
            from_name: crate::render::SYSTEM_NAME.into(),
            timeout_secs: 15,
        }
    }
}

impl SmtpConfig {
    pub fn is_configured(&self) -> bool {
        !self.host.trim().is_empty() && !self.from_email.trim().is_empty()
    }
}

/// Simulador do ESP32.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub client_id: String,
    /// Intervalo entre publicações em segundos
    pub interval_secs: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            client_id: "esp32_simulator".into(),
            interval_secs: 5.0,
        }
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    pub smtp: SmtpConfig,
    pub simulator: SimulatorConfig,
    /// Thresholds e destino iniciais (semeiam o `settings.toml` do armazenamento)
    pub settings: SystemSettings,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Caminho do config.toml: primeiro argumento da linha de comando ou
    /// o diretório do executável.
    pub fn default_path() -> PathBuf {
        if let Some(arg) = std::env::args().nth(1).filter(|a| !a.starts_with('-')) {
            return PathBuf::from(arg);
        }
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Aplica overrides do ambiente do processo.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Aplica overrides a partir de uma função de lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MQTT_BROKER").filter(|v| !v.is_empty()) {
            self.mqtt.broker = v;
        }
        if let Some(v) = lookup("SMTP_USERNAME") {
            self.smtp.username = v;
        }
        if let Some(v) = lookup("SMTP_PASSWORD") {
            self.smtp.password = v;
        }
    }

    /// Resolve o diretório de dados relativo ao arquivo de configuração.
    pub fn data_dir(&self, config_path: &Path) -> PathBuf {
        let dir = Path::new(&self.storage.data_dir);
        if dir.is_absolute() {
            return dir.to_path_buf();
        }
        config_path
            .parent()
            .unwrap_or(Path::new("."))
            .join(dir)
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.mqtt.broker.trim().is_empty() {
            errors.push("Broker MQTT não pode ser vazio".into());
        }
        if self.mqtt.port == 0 {
            errors.push("Porta MQTT não pode ser 0".into());
        }
        if self.mqtt.topic.trim().is_empty() {
            errors.push("Tópico MQTT não pode ser vazio".into());
        }
        if self.mqtt.client_id.trim().is_empty() {
            errors.push("Client ID MQTT não pode ser vazio".into());
        }
        if self.mqtt.keep_alive_secs < 5 {
            errors.push(format!(
                "Keep-alive MQTT inválido: {} (mínimo 5s)",
                self.mqtt.keep_alive_secs
            ));
        }
        if self.pipeline.queue_capacity == 0 {
            errors.push("Capacidade da fila não pode ser 0".into());
        }
        if self.pipeline.workers == 0 || self.pipeline.workers > 64 {
            errors.push(format!(
                "Número de workers inválido: {} (1–64)",
                self.pipeline.workers
            ));
        }
        if !self.mqtt.reconnect_delay_secs.is_finite()
            || !(0.0..=3600.0).contains(&self.mqtt.reconnect_delay_secs)
        {
            errors.push(format!(
                "Pausa de reconexão inválida: {} (0.0–3600.0)",
                self.mqtt.reconnect_delay_secs
            ));
        }
        if !self.pipeline.shutdown_timeout_secs.is_finite()
            || !(0.0..=3600.0).contains(&self.pipeline.shutdown_timeout_secs)
        {
            errors.push(format!(
                "Timeout de encerramento inválido: {} (0.0–3600.0)",
                self.pipeline.shutdown_timeout_secs
            ));
        }
        if !(0.1..=3600.0).contains(&self.simulator.interval_secs) {
            errors.push(format!(
                "Intervalo do simulador inválido: {} (0.1–3600.0)",
                self.simulator.interval_secs
            ));
        }
        errors.extend(self.settings.thresholds.validate());

        errors
    }
}
