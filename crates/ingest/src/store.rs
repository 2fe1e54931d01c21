//! Armazenamento de leituras, alertas e configurações do sistema.
//!
//! O pipeline só enxerga o trait [`Store`]. Duas implementações:
//! - [`MemoryStore`] – tudo em memória (testes, execuções efêmeras)
//! - [`JsonStore`] – diretório com `readings.jsonl` (append), `alerts.jsonl`
//!   (log de eventos de alerta, append) e `settings.toml` (editado pelo
//!   operador e relido a cada snapshot)
//!
//! ## `alerts.jsonl`
//!
//! Uma linha JSON por evento, discriminada por `op`:
//!
//! ```text
//! {"op":"raised","alert":{...}}
//! {"op":"notified","id":"<uuid>","notified":true}
//! {"op":"resolved","id":"<uuid>","resolved_at":"2026-01-20T15:00:00Z"}
//! ```
//!
//! O operador resolve um alerta anexando uma linha `resolved` (o
//! `resolved_at` é opcional). O store relê o final do log antes de cada
//! operação, então linhas anexadas por fora valem na mensagem seguinte.
//! Em memória ficam só os alertas não resolvidos.

use chrono::{DateTime, Utc};
use crop_core::types::{Alert, AlertId, SensorReading, SystemSettings};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Erros de persistência.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Erro de I/O em {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Erro de serialização: {0}")]
    Serialize(String),

    #[error("Configurações inválidas em {path}: {reason}")]
    Settings { path: PathBuf, reason: String },

    #[error("Alerta desconhecido ou já resolvido: {0}")]
    UnknownAlert(AlertId),
}

/// Interface estreita de persistência usada pelo pipeline.
pub trait Store: Send + Sync {
    fn save_reading(&self, reading: &SensorReading) -> Result<(), StoreError>;

    /// Snapshot atual de thresholds + destino de notificação.
    fn settings(&self) -> Result<SystemSettings, StoreError>;

    /// Persiste o alerta e devolve o id atribuído.
    fn save_alert(&self, alert: &Alert) -> Result<AlertId, StoreError>;

    fn update_alert_notified(&self, id: &AlertId, notified: bool) -> Result<(), StoreError>;

    fn unresolved_alerts(&self) -> Result<Vec<Alert>, StoreError>;

    /// Marca um alerta como resolvido (ação do operador).
    fn resolve_alert(&self, id: &AlertId) -> Result<(), StoreError>;
}

fn new_alert_id() -> AlertId {
    AlertId(uuid::Uuid::new_v4().to_string())
}

// ──────────────────────────────────────────────
// Memória
// ──────────────────────────────────────────────

/// Armazenamento em memória.
#[derive(Debug, Default)]
pub struct MemoryStore {
    settings: Mutex<SystemSettings>,
    readings: Mutex<Vec<SensorReading>>,
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryStore {
    pub fn new(settings: SystemSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
            ..Default::default()
        }
    }

    /// Substitui o snapshot de configurações (equivalente ao CRUD externo).
    pub fn set_settings(&self, settings: SystemSettings) {
        *self.settings.lock() = settings;
    }

    pub fn readings(&self) -> Vec<SensorReading> {
        self.readings.lock().clone()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

impl Store for MemoryStore {
    fn save_reading(&self, reading: &SensorReading) -> Result<(), StoreError> {
        self.readings.lock().push(reading.clone());
        Ok(())
    }

    fn settings(&self) -> Result<SystemSettings, StoreError> {
        Ok(self.settings.lock().clone())
    }

    fn save_alert(&self, alert: &Alert) -> Result<AlertId, StoreError> {
        let id = new_alert_id();
        let mut stored = alert.clone();
        stored.id = Some(id.clone());
        self.alerts.lock().push(stored);
        Ok(id)
    }

    fn update_alert_notified(&self, id: &AlertId, notified: bool) -> Result<(), StoreError> {
        let mut alerts = self.alerts.lock();
        let alert = alerts
            .iter_mut()
            .find(|a| a.id.as_ref() == Some(id))
            .ok_or_else(|| StoreError::UnknownAlert(id.clone()))?;
        alert.notified = notified;
        Ok(())
    }

    fn unresolved_alerts(&self) -> Result<Vec<Alert>, StoreError> {
        Ok(self
            .alerts
            .lock()
            .iter()
            .filter(|a| !a.resolved)
            .cloned()
            .collect())
    }

    fn resolve_alert(&self, id: &AlertId) -> Result<(), StoreError> {
        let mut alerts = self.alerts.lock();
        let alert = alerts
            .iter_mut()
            .find(|a| a.id.as_ref() == Some(id) && !a.resolved)
            .ok_or_else(|| StoreError::UnknownAlert(id.clone()))?;
        alert.resolved = true;
        alert.resolved_at = Some(Utc::now());
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Arquivos JSON
// ──────────────────────────────────────────────

const READINGS_FILE: &str = "readings.jsonl";
const ALERTS_FILE: &str = "alerts.jsonl";
const SETTINGS_FILE: &str = "settings.toml";

/// Uma linha de `alerts.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum AlertRecord {
    Raised {
        alert: Alert,
    },
    Notified {
        id: AlertId,
        notified: bool,
    },
    Resolved {
        id: AlertId,
        #[serde(default = "Utc::now")]
        resolved_at: DateTime<Utc>,
    },
}

/// Alertas não resolvidos + posição já lida do log.
#[derive(Debug, Default)]
struct AlertLog {
    unresolved: Vec<Alert>,
    offset: u64,
}

impl AlertLog {
    fn apply(&mut self, record: AlertRecord) {
        match record {
            AlertRecord::Raised { alert } => {
                let known = alert.id.is_some()
                    && self.unresolved.iter().any(|a| a.id == alert.id);
                if !alert.resolved && !known {
                    self.unresolved.push(alert);
                }
            }
            AlertRecord::Notified { id, notified } => {
                if let Some(a) = self.find_mut(&id) {
                    a.notified = notified;
                }
            }
            AlertRecord::Resolved { id, .. } => {
                self.unresolved.retain(|a| a.id.as_ref() != Some(&id));
            }
        }
    }

    fn find_mut(&mut self, id: &AlertId) -> Option<&mut Alert> {
        self.unresolved.iter_mut().find(|a| a.id.as_ref() == Some(id))
    }

    fn contains(&self, id: &AlertId) -> bool {
        self.unresolved.iter().any(|a| a.id.as_ref() == Some(id))
    }

    /// Aplica as linhas completas anexadas desde a última leitura.
    fn catch_up(&mut self, path: &Path) -> Result<(), StoreError> {
        let mut file = File::open(path).map_err(|e| io_err(path, e))?;
        file.seek(SeekFrom::Start(self.offset))
            .map_err(|e| io_err(path, e))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(|e| io_err(path, e))?;

        let mut consumed = 0usize;
        for line in buf.split_inclusive(|b| *b == b'\n') {
            // Linha sem '\n' ainda está sendo escrita.
            if !line.ends_with(b"\n") {
                break;
            }
            consumed += line.len();
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<AlertRecord>(line) {
                Ok(record) => self.apply(record),
                Err(e) => warn!("Linha inválida em {}: {e}", path.display()),
            }
        }
        self.offset += consumed as u64;
        Ok(())
    }
}

/// Armazenamento em diretório local.
pub struct JsonStore {
    dir: PathBuf,
    readings: Mutex<File>,
    alerts_file: Mutex<File>,
    alerts: Mutex<AlertLog>,
}

impl JsonStore {
    /// Abre (ou cria) o diretório de dados. Se `settings.toml` não existir,
    /// é criado com `initial_settings`.
    pub fn open(dir: &Path, initial_settings: &SystemSettings) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let settings_path = dir.join(SETTINGS_FILE);
        if !settings_path.exists() {
            let content = toml::to_string_pretty(initial_settings)
                .map_err(|e| StoreError::Serialize(e.to_string()))?;
            fs::write(&settings_path, content).map_err(|e| io_err(&settings_path, e))?;
            info!("Configurações iniciais salvas em {}", settings_path.display());
        }

        let alerts_path = dir.join(ALERTS_FILE);
        let alerts_file = append_file(&alerts_path)?;
        let mut log = AlertLog::default();
        log.catch_up(&alerts_path)?;

        let readings = append_file(&dir.join(READINGS_FILE))?;

        info!(
            "Armazenamento aberto em {} ({} alertas não resolvidos)",
            dir.display(),
            log.unresolved.len()
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            readings: Mutex::new(readings),
            alerts_file: Mutex::new(alerts_file),
            alerts: Mutex::new(log),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn alerts_path(&self) -> PathBuf {
        self.dir.join(ALERTS_FILE)
    }

    /// Anexa um evento ao log e o aplica (junto com linhas externas).
    fn record(&self, log: &mut AlertLog, record: &AlertRecord) -> Result<(), StoreError> {
        let path = self.alerts_path();
        let mut line =
            serde_json::to_vec(record).map_err(|e| StoreError::Serialize(e.to_string()))?;
        line.push(b'\n');
        self.alerts_file
            .lock()
            .write_all(&line)
            .map_err(|e| io_err(&path, e))?;
        log.catch_up(&path)?;
        debug!("Evento de alerta gravado em {}", path.display());
        Ok(())
    }
}

impl Store for JsonStore {
    fn save_reading(&self, reading: &SensorReading) -> Result<(), StoreError> {
        let mut line =
            serde_json::to_vec(reading).map_err(|e| StoreError::Serialize(e.to_string()))?;
        line.push(b'\n');
        let path = self.dir.join(READINGS_FILE);
        let mut file = self.readings.lock();
        file.write_all(&line).map_err(|e| io_err(&path, e))
    }

    fn settings(&self) -> Result<SystemSettings, StoreError> {
        let path = self.dir.join(SETTINGS_FILE);
        let content = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let settings: SystemSettings =
            toml::from_str(&content).map_err(|e| StoreError::Settings {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        let errors = settings.thresholds.validate();
        if !errors.is_empty() {
            return Err(StoreError::Settings {
                path,
                reason: errors.join("; "),
            });
        }
        Ok(settings)
    }

    fn save_alert(&self, alert: &Alert) -> Result<AlertId, StoreError> {
        let id = new_alert_id();
        let mut stored = alert.clone();
        stored.id = Some(id.clone());

        let mut log = self.alerts.lock();
        self.record(&mut log, &AlertRecord::Raised { alert: stored })?;
        Ok(id)
    }

    fn update_alert_notified(&self, id: &AlertId, notified: bool) -> Result<(), StoreError> {
        let mut log = self.alerts.lock();
        log.catch_up(&self.alerts_path())?;
        if !log.contains(id) {
            return Err(StoreError::UnknownAlert(id.clone()));
        }
        self.record(
            &mut log,
            &AlertRecord::Notified {
                id: id.clone(),
                notified,
            },
        )
    }

    fn unresolved_alerts(&self) -> Result<Vec<Alert>, StoreError> {
        let mut log = self.alerts.lock();
        log.catch_up(&self.alerts_path())?;
        Ok(log.unresolved.clone())
    }

    fn resolve_alert(&self, id: &AlertId) -> Result<(), StoreError> {
        let mut log = self.alerts.lock();
        log.catch_up(&self.alerts_path())?;
        if !log.contains(id) {
            return Err(StoreError::UnknownAlert(id.clone()));
        }
        self.record(
            &mut log,
            &AlertRecord::Resolved {
                id: id.clone(),
                resolved_at: Utc::now(),
            },
        )?;
        info!("Alerta {id} resolvido");
        Ok(())
    }
}

fn append_file(path: &Path) -> Result<File, StoreError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crop_core::alerts::{evaluate, AlertTracker};
    use crop_core::types::{Bounds, ThresholdConfig};

    fn sample_alerts() -> Vec<Alert> {
        let reading = SensorReading::new(25.0, 38.0, 60.0, 20000.0, Utc::now()).unwrap();
        let candidates = evaluate(&reading, &ThresholdConfig::default());
        AlertTracker::default().accept(&candidates, &[])
    }

    #[test]
    fn memory_store_assigns_ids_and_tracks_notified() {
        let store = MemoryStore::default();
        let alerts = sample_alerts();
        let id = store.save_alert(&alerts[0]).unwrap();
        store.save_alert(&alerts[1]).unwrap();

        store.update_alert_notified(&id, true).unwrap();
        let stored = store.alerts();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].id.as_ref(), Some(&id));
        assert!(stored[0].notified);
        assert!(!stored[1].notified);
        assert_ne!(stored[0].id, stored[1].id);
    }

    #[test]
    fn memory_store_unknown_alert() {
        let store = MemoryStore::default();
        let err = store
            .update_alert_notified(&AlertId("nope".into()), true)
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownAlert(_)));
    }

    #[test]
    fn resolved_alerts_are_not_unresolved() {
        let store = MemoryStore::default();
        let alerts = sample_alerts();
        let id = store.save_alert(&alerts[0]).unwrap();
        store.save_alert(&alerts[1]).unwrap();
        store.resolve_alert(&id).unwrap();

        let unresolved = store.unresolved_alerts().unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].alert_type, alerts[1].alert_type);
    }

    #[test]
    fn json_store_seeds_settings_and_persists_alerts() {
        let tmp = tempfile::tempdir().unwrap();
        let mut initial = SystemSettings::default();
        initial.notification.email = "farmer@example.com".into();
        initial.notification.enabled = true;

        let id = {
            let store = JsonStore::open(tmp.path(), &initial).unwrap();
            assert_eq!(store.settings().unwrap(), initial);

            let reading = SensorReading::new(25.0, 38.0, 60.0, 20000.0, Utc::now()).unwrap();
            store.save_reading(&reading).unwrap();
            store.save_reading(&reading).unwrap();

            let alerts = sample_alerts();
            let id = store.save_alert(&alerts[0]).unwrap();
            store.save_alert(&alerts[1]).unwrap();
            store.update_alert_notified(&id, true).unwrap();
            id
        };

        let lines = fs::read_to_string(tmp.path().join(READINGS_FILE)).unwrap();
        assert_eq!(lines.lines().count(), 2);

        // Reabre com outras configurações iniciais: o arquivo existente vence.
        let reopened = JsonStore::open(tmp.path(), &SystemSettings::default()).unwrap();
        assert_eq!(reopened.settings().unwrap(), initial);
        let unresolved = reopened.unresolved_alerts().unwrap();
        assert_eq!(unresolved.len(), 2);
        let first = unresolved.iter().find(|a| a.id.as_ref() == Some(&id)).unwrap();
        assert!(first.notified);
    }

    #[test]
    fn json_store_rereads_edited_settings() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonStore::open(tmp.path(), &SystemSettings::default()).unwrap();

        let edited = r#"
[thresholds.temperature]
min = 5.0
max = 25.0

[notification]
email = "ops@example.com"
enabled = true
"#;
        fs::write(tmp.path().join(SETTINGS_FILE), edited).unwrap();

        let settings = store.settings().unwrap();
        assert_eq!(settings.thresholds.temperature, Some(Bounds::new(5.0, 25.0)));
        assert_eq!(settings.thresholds.soil_moisture, Some(Bounds::new(30.0, 70.0)));
        assert_eq!(settings.notification.destination(), Some("ops@example.com"));
    }

    #[test]
    fn json_store_rejects_invalid_settings() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonStore::open(tmp.path(), &SystemSettings::default()).unwrap();
        fs::write(
            tmp.path().join(SETTINGS_FILE),
            "[thresholds.humidity]\nmin = 90.0\nmax = 10.0\n",
        )
        .unwrap();
        assert!(matches!(store.settings(), Err(StoreError::Settings { .. })));

        fs::write(tmp.path().join(SETTINGS_FILE), "not = [valid").unwrap();
        assert!(matches!(store.settings(), Err(StoreError::Settings { .. })));
    }

    #[test]
    fn json_store_resolve_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let alerts = sample_alerts();
        let (soil, temp) = {
            let store = JsonStore::open(tmp.path(), &SystemSettings::default()).unwrap();
            let soil = store.save_alert(&alerts[0]).unwrap();
            let temp = store.save_alert(&alerts[1]).unwrap();
            store.resolve_alert(&soil).unwrap();

            let unresolved = store.unresolved_alerts().unwrap();
            assert_eq!(unresolved.len(), 1);
            assert_eq!(unresolved[0].id.as_ref(), Some(&temp));
            (soil, temp)
        };

        let reopened = JsonStore::open(tmp.path(), &SystemSettings::default()).unwrap();
        let unresolved = reopened.unresolved_alerts().unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].id.as_ref(), Some(&temp));

        // Já resolvido: não pode ser resolvido nem notificado de novo.
        assert!(matches!(reopened.resolve_alert(&soil), Err(StoreError::UnknownAlert(_))));
        assert!(matches!(
            reopened.update_alert_notified(&soil, true),
            Err(StoreError::UnknownAlert(_))
        ));
    }

    #[test]
    fn json_store_picks_up_externally_appended_resolution() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonStore::open(tmp.path(), &SystemSettings::default()).unwrap();
        let alerts = sample_alerts();
        let soil = store.save_alert(&alerts[0]).unwrap();
        let temp = store.save_alert(&alerts[1]).unwrap();

        let mut log = OpenOptions::new()
            .append(true)
            .open(tmp.path().join(ALERTS_FILE))
            .unwrap();
        writeln!(log, r#"{{"op":"resolved","id":"{}"}}"#, soil.0).unwrap();

        let unresolved = store.unresolved_alerts().unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].id.as_ref(), Some(&temp));

        // O próximo save não desfaz a resolução externa.
        store.save_alert(&alerts[0]).unwrap();
        let unresolved = store.unresolved_alerts().unwrap();
        assert_eq!(unresolved.len(), 2);
        assert!(unresolved.iter().all(|a| a.id.as_ref() != Some(&soil)));
    }

    #[test]
    fn json_store_skips_garbage_and_waits_for_partial_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonStore::open(tmp.path(), &SystemSettings::default()).unwrap();
        let alerts = sample_alerts();
        let soil = store.save_alert(&alerts[0]).unwrap();

        let path = tmp.path().join(ALERTS_FILE);
        let mut log = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(log, "isto não é json").unwrap();
        write!(log, r#"{{"op":"resolved","id":"{}""#, soil.0).unwrap();
        assert_eq!(store.unresolved_alerts().unwrap().len(), 1);

        writeln!(log, "}}").unwrap();
        assert!(store.unresolved_alerts().unwrap().is_empty());
    }

    #[test]
    fn json_store_appends_instead_of_rewriting() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonStore::open(tmp.path(), &SystemSettings::default()).unwrap();
        let alerts = sample_alerts();
        let id = store.save_alert(&alerts[0]).unwrap();
        store.update_alert_notified(&id, true).unwrap();
        store.resolve_alert(&id).unwrap();

        let content = fs::read_to_string(tmp.path().join(ALERTS_FILE)).unwrap();
        let ops: Vec<String> = content
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["op"].to_string())
            .collect();
        assert_eq!(ops, [r#""raised""#, r#""notified""#, r#""resolved""#]);
        assert!(store.unresolved_alerts().unwrap().is_empty());
    }
}
