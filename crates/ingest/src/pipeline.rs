//! Pipeline de processamento de uma mensagem.
//!
//! validar → salvar leitura → snapshot de configurações → avaliar →
//! aceitar → salvar/notificar cada alerta. Cada etapa de persistência e
//! cada alerta falham de forma isolada; nenhuma falha aborta a mensagem
//! depois que a leitura foi validada.

use crate::dispatch::{DispatchResult, Dispatcher};
use crate::store::Store;
use crop_core::alerts::{evaluate, AlertTracker};
use crop_core::protocol::{validate, ValidationError};
use crop_core::types::{Alert, AlertId, SystemSettings};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// Contadores do processo (lidos pelo log de status).
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub received: AtomicU64,
    pub dropped: AtomicU64,
    pub rejected: AtomicU64,
    pub processed: AtomicU64,
    pub alerts_raised: AtomicU64,
    pub notifications_sent: AtomicU64,
    pub notifications_failed: AtomicU64,
    pub persistence_failures: AtomicU64,
}

impl PipelineStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }
}

/// Cópia pontual dos contadores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub processed: u64,
    pub alerts_raised: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub persistence_failures: u64,
}

/// Destino final de um alerta no processamento.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertOutcome {
    pub alert: Alert,
    /// `None` quando `save_alert` falhou
    pub id: Option<AlertId>,
    /// `None` quando a notificação foi pulada (destino ausente/desligado)
    pub dispatch: Option<DispatchResult>,
}

/// Resultado de [`Pipeline::process`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Rejected(ValidationError),
    Processed {
        reading_saved: bool,
        alerts: Vec<AlertOutcome>,
    },
}

/// Coordena validador, avaliador, tracker, armazenamento e dispatcher.
pub struct Pipeline {
    store: Arc<dyn Store>,
    tracker: AlertTracker,
    dispatcher: Option<Dispatcher>,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    /// `dispatcher = None` desliga as notificações (SMTP não configurado).
    pub fn new(store: Arc<dyn Store>, tracker: AlertTracker, dispatcher: Option<Dispatcher>) -> Self {
        Self {
            store,
            tracker,
            dispatcher,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    pub fn with_stats(mut self, stats: Arc<PipelineStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Processa um payload bruto do início ao fim.
    pub fn process(&self, raw: &[u8]) -> ProcessOutcome {
        // ── 1. Validação ──
        let reading = match validate(raw) {
            Ok(r) => r,
            Err(e) => {
                warn!("Payload descartado ({} bytes): {e}", raw.len());
                PipelineStats::bump(&self.stats.rejected);
                return ProcessOutcome::Rejected(e);
            }
        };
        debug!(
            "Leitura: solo {:.1}% | {:.1}°C | ar {:.1}% | {:.0} lux",
            reading.soil_moisture(),
            reading.temperature(),
            reading.humidity(),
            reading.light_intensity()
        );

        // ── 2. Persistência da leitura ──
        let reading_saved = match self.store.save_reading(&reading) {
            Ok(()) => true,
            Err(e) => {
                error!("Falha ao salvar leitura: {e}");
                PipelineStats::bump(&self.stats.persistence_failures);
                false
            }
        };

        // ── 3. Snapshot de configurações ──
        let settings = match self.store.settings() {
            Ok(s) => s,
            Err(e) => {
                error!("Falha ao ler configurações, usando thresholds padrão: {e}");
                PipelineStats::bump(&self.stats.persistence_failures);
                SystemSettings::default()
            }
        };

        // ── 4/5. Avaliação e aceitação ──
        let candidates = evaluate(&reading, &settings.thresholds);
        let unresolved = if self.tracker.needs_unresolved() && !candidates.is_empty() {
            self.store.unresolved_alerts().unwrap_or_else(|e| {
                error!("Falha ao ler alertas ativos: {e}");
                PipelineStats::bump(&self.stats.persistence_failures);
                Vec::new()
            })
        } else {
            Vec::new()
        };
        let alerts = self.tracker.accept(&candidates, &unresolved);

        // ── 6. Persistência + notificação por alerta ──
        let destination = settings.notification.destination();
        let outcomes = alerts
            .into_iter()
            .map(|alert| self.raise(alert, destination))
            .collect();

        PipelineStats::bump(&self.stats.processed);
        ProcessOutcome::Processed {
            reading_saved,
            alerts: outcomes,
        }
    }

    fn raise(&self, alert: Alert, destination: Option<&str>) -> AlertOutcome {
        PipelineStats::bump(&self.stats.alerts_raised);

        let id = match self.store.save_alert(&alert) {
            Ok(id) => {
                info!("🚨 Alerta {} ({}) registrado: {}", alert.alert_type, alert.severity, alert.message);
                Some(id)
            }
            Err(e) => {
                error!("Falha ao salvar alerta {}: {e}", alert.alert_type);
                PipelineStats::bump(&self.stats.persistence_failures);
                None
            }
        };

        let dispatch = match (&self.dispatcher, destination) {
            (Some(dispatcher), Some(to)) => Some(dispatcher.dispatch(&alert, to)),
            _ => {
                debug!("Notificação desativada, alerta {} não enviado", alert.alert_type);
                None
            }
        };

        let mut alert = alert;
        match &dispatch {
            Some(DispatchResult::Sent) => {
                PipelineStats::bump(&self.stats.notifications_sent);
                alert.notified = true;
                if let Some(id) = &id {
                    if let Err(e) = self.store.update_alert_notified(id, true) {
                        error!("Falha ao marcar alerta {id} como notificado: {e}");
                        PipelineStats::bump(&self.stats.persistence_failures);
                    }
                }
            }
            Some(DispatchResult::Failed(_)) => {
                PipelineStats::bump(&self.stats.notifications_failed);
            }
            None => {}
        }

        AlertOutcome { alert, id, dispatch }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{DispatchError, Notifier};
    use crate::store::{JsonStore, MemoryStore, StoreError};
    use crop_core::alerts::DedupPolicy;
    use crop_core::render::RenderedNotification;
    use crop_core::types::{Quantity, SensorReading, Severity};
    use parking_lot::Mutex;

    const SCENARIO: &[u8] =
        br#"{"soil_moisture":25,"temperature":38,"humidity":60,"light_intensity":20000}"#;

    /// Notifier que falha para os assuntos listados.
    #[derive(Default)]
    struct FakeNotifier {
        sent: Mutex<Vec<String>>,
        fail_subjects: Vec<String>,
    }

    impl Notifier for FakeNotifier {
        fn send(&self, _to: &str, n: &RenderedNotification) -> Result<(), DispatchError> {
            if self.fail_subjects.contains(&n.subject) {
                return Err(DispatchError::Transport("timeout".into()));
            }
            self.sent.lock().push(n.subject.clone());
            Ok(())
        }
    }

    /// Store cujas operações falham conforme as flags.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_readings: bool,
        fail_settings: bool,
        fail_alerts: bool,
    }

    fn io_failure() -> StoreError {
        StoreError::Io {
            path: "/dev/full".into(),
            source: std::io::Error::other("disco cheio"),
        }
    }

    impl Store for FlakyStore {
        fn save_reading(&self, r: &SensorReading) -> Result<(), StoreError> {
            if self.fail_readings {
                return Err(io_failure());
            }
            self.inner.save_reading(r)
        }
        fn settings(&self) -> Result<SystemSettings, StoreError> {
            if self.fail_settings {
                return Err(io_failure());
            }
            self.inner.settings()
        }
        fn save_alert(&self, a: &Alert) -> Result<AlertId, StoreError> {
            if self.fail_alerts {
                return Err(io_failure());
            }
            self.inner.save_alert(a)
        }
        fn update_alert_notified(&self, id: &AlertId, n: bool) -> Result<(), StoreError> {
            self.inner.update_alert_notified(id, n)
        }
        fn unresolved_alerts(&self) -> Result<Vec<Alert>, StoreError> {
            self.inner.unresolved_alerts()
        }
        fn resolve_alert(&self, id: &AlertId) -> Result<(), StoreError> {
            self.inner.resolve_alert(id)
        }
    }

    fn enabled_settings() -> SystemSettings {
        let mut s = SystemSettings::default();
        s.notification.email = "farmer@example.com".into();
        s.notification.enabled = true;
        s
    }

    fn pipeline_with(
        store: Arc<dyn Store>,
        notifier: Arc<FakeNotifier>,
        policy: DedupPolicy,
    ) -> Pipeline {
        Pipeline::new(store, AlertTracker::new(policy), Some(Dispatcher::new(notifier)))
    }

    #[test]
    fn end_to_end_scenario_raises_two_alerts() {
        let store = Arc::new(MemoryStore::new(enabled_settings()));
        let notifier = Arc::new(FakeNotifier::default());
        let pipeline = pipeline_with(store.clone(), notifier.clone(), DedupPolicy::Always);

        let ProcessOutcome::Processed { reading_saved, alerts } = pipeline.process(SCENARIO) else {
            panic!("cenário deveria ser processado");
        };
        assert!(reading_saved);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].alert.alert_type.as_string(), "soil_moisture_low");
        assert_eq!(alerts[0].alert.severity, Severity::Warning);
        assert_eq!(alerts[1].alert.alert_type.as_string(), "temperature_high");
        assert_eq!(alerts[1].alert.severity, Severity::Warning);

        assert_eq!(store.readings().len(), 1);
        let stored = store.alerts();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|a| a.notified));
        assert_eq!(notifier.sent.lock().len(), 2);

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.alerts_raised, 2);
        assert_eq!(stats.notifications_sent, 2);
    }

    #[test]
    fn disabled_destination_skips_dispatch() {
        let mut settings = enabled_settings();
        settings.notification.enabled = false;
        let store = Arc::new(MemoryStore::new(settings));
        let notifier = Arc::new(FakeNotifier::default());
        let pipeline = pipeline_with(store.clone(), notifier.clone(), DedupPolicy::Always);

        let ProcessOutcome::Processed { alerts, .. } = pipeline.process(SCENARIO) else {
            panic!("cenário deveria ser processado");
        };
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|o| o.dispatch.is_none()));
        assert!(store.alerts().iter().all(|a| !a.notified));
        assert!(notifier.sent.lock().is_empty());
    }

    #[test]
    fn missing_dispatcher_skips_dispatch() {
        let store = Arc::new(MemoryStore::new(enabled_settings()));
        let pipeline = Pipeline::new(store.clone(), AlertTracker::default(), None);
        let ProcessOutcome::Processed { alerts, .. } = pipeline.process(SCENARIO) else {
            panic!("cenário deveria ser processado");
        };
        assert!(alerts.iter().all(|o| o.dispatch.is_none() && o.id.is_some()));
        assert_eq!(store.alerts().len(), 2);
    }

    #[test]
    fn one_dispatch_failure_does_not_affect_siblings() {
        let store = Arc::new(MemoryStore::new(enabled_settings()));
        let notifier = Arc::new(FakeNotifier {
            fail_subjects: vec!["[Smart Crop] Umidade do solo baixa".into()],
            ..Default::default()
        });
        let pipeline = pipeline_with(store.clone(), notifier.clone(), DedupPolicy::Always);

        let ProcessOutcome::Processed { alerts, .. } = pipeline.process(SCENARIO) else {
            panic!("cenário deveria ser processado");
        };
        assert!(matches!(alerts[0].dispatch, Some(DispatchResult::Failed(_))));
        assert_eq!(alerts[1].dispatch, Some(DispatchResult::Sent));

        let stored = store.alerts();
        assert!(!stored[0].notified);
        assert!(stored[1].notified);
        assert_eq!(pipeline.stats().snapshot().notifications_failed, 1);
    }

    #[test]
    fn malformed_payload_has_no_side_effects() {
        let store = Arc::new(MemoryStore::new(enabled_settings()));
        let notifier = Arc::new(FakeNotifier::default());
        let pipeline = pipeline_with(store.clone(), notifier.clone(), DedupPolicy::Always);

        assert!(matches!(
            pipeline.process(b"{garbage"),
            ProcessOutcome::Rejected(ValidationError::MalformedPayload(_))
        ));
        assert!(matches!(
            pipeline.process(br#"{"soil_moisture":25,"temperature":38,"humidity":160,"light_intensity":1}"#),
            ProcessOutcome::Rejected(ValidationError::OutOfRange {
                quantity: Quantity::Humidity,
                ..
            })
        ));
        assert!(store.readings().is_empty());
        assert!(store.alerts().is_empty());
        assert!(notifier.sent.lock().is_empty());
        assert_eq!(pipeline.stats().snapshot().rejected, 2);
    }

    #[test]
    fn reading_persistence_failure_still_evaluates() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(enabled_settings()),
            fail_readings: true,
            ..Default::default()
        });
        let notifier = Arc::new(FakeNotifier::default());
        let pipeline = pipeline_with(store.clone(), notifier.clone(), DedupPolicy::Always);

        let ProcessOutcome::Processed { reading_saved, alerts } = pipeline.process(SCENARIO) else {
            panic!("cenário deveria ser processado");
        };
        assert!(!reading_saved);
        assert_eq!(alerts.len(), 2);
        assert_eq!(store.inner.alerts().len(), 2);
        assert_eq!(notifier.sent.lock().len(), 2);
    }

    #[test]
    fn alert_persistence_failure_still_dispatches() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(enabled_settings()),
            fail_alerts: true,
            ..Default::default()
        });
        let notifier = Arc::new(FakeNotifier::default());
        let pipeline = pipeline_with(store.clone(), notifier.clone(), DedupPolicy::Always);

        let ProcessOutcome::Processed { alerts, .. } = pipeline.process(SCENARIO) else {
            panic!("cenário deveria ser processado");
        };
        assert!(alerts.iter().all(|o| o.id.is_none()));
        assert_eq!(notifier.sent.lock().len(), 2);
        assert_eq!(pipeline.stats().snapshot().persistence_failures, 2);
    }

    #[test]
    fn settings_failure_falls_back_to_defaults_without_notifying() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(enabled_settings()),
            fail_settings: true,
            ..Default::default()
        });
        let notifier = Arc::new(FakeNotifier::default());
        let pipeline = pipeline_with(store.clone(), notifier.clone(), DedupPolicy::Always);

        let ProcessOutcome::Processed { alerts, .. } = pipeline.process(SCENARIO) else {
            panic!("cenário deveria ser processado");
        };
        assert_eq!(alerts.len(), 2);
        assert!(notifier.sent.lock().is_empty());
    }

    #[test]
    fn suppress_policy_consults_unresolved_alerts() {
        let store = Arc::new(MemoryStore::new(enabled_settings()));
        let notifier = Arc::new(FakeNotifier::default());
        let pipeline =
            pipeline_with(store.clone(), notifier.clone(), DedupPolicy::SuppressWhileActive);

        pipeline.process(SCENARIO);
        let ProcessOutcome::Processed { alerts, .. } = pipeline.process(SCENARIO) else {
            panic!("cenário deveria ser processado");
        };
        assert!(alerts.is_empty());
        assert_eq!(store.alerts().len(), 2);

        let soil_id = store.alerts()[0].id.clone().unwrap();
        store.resolve_alert(&soil_id).unwrap();
        let ProcessOutcome::Processed { alerts, .. } = pipeline.process(SCENARIO) else {
            panic!("cenário deveria ser processado");
        };
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert.alert_type.as_string(), "soil_moisture_low");
    }

    #[test]
    fn suppression_with_json_store_lifts_after_resolve() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonStore::open(tmp.path(), &SystemSettings::default()).unwrap());
        let pipeline = Pipeline::new(
            store.clone(),
            AlertTracker::new(DedupPolicy::SuppressWhileActive),
            None,
        );

        let ProcessOutcome::Processed { alerts, .. } = pipeline.process(SCENARIO) else {
            panic!("cenário deveria ser processado");
        };
        assert_eq!(alerts.len(), 2);
        let ProcessOutcome::Processed { alerts: repeated, .. } = pipeline.process(SCENARIO) else {
            panic!("cenário deveria ser processado");
        };
        assert!(repeated.is_empty());

        let temp_id = alerts[1].id.clone().unwrap();
        store.resolve_alert(&temp_id).unwrap();
        let ProcessOutcome::Processed { alerts, .. } = pipeline.process(SCENARIO) else {
            panic!("cenário deveria ser processado");
        };
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert.alert_type.as_string(), "temperature_high");
    }

    #[test]
    fn always_policy_repeats_alerts() {
        let store = Arc::new(MemoryStore::new(SystemSettings::default()));
        let pipeline = Pipeline::new(store.clone(), AlertTracker::default(), None);
        pipeline.process(SCENARIO);
        pipeline.process(SCENARIO);
        assert_eq!(store.alerts().len(), 4);
    }

    #[test]
    fn settings_snapshot_is_read_per_message() {
        let store = Arc::new(MemoryStore::new(SystemSettings::default()));
        let pipeline = Pipeline::new(store.clone(), AlertTracker::default(), None);
        pipeline.process(SCENARIO);

        let mut relaxed = SystemSettings::default();
        relaxed.thresholds.soil_moisture = None;
        relaxed.thresholds.temperature = None;
        store.set_settings(relaxed);

        let ProcessOutcome::Processed { alerts, .. } = pipeline.process(SCENARIO) else {
            panic!("cenário deveria ser processado");
        };
        assert!(alerts.is_empty());
    }
}
