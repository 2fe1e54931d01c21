//! # Smart Crop Ingest
//!
//! Processo de longa duração: assina o tópico MQTT do dispositivo, grava
//! as leituras e dispara alertas quando algum valor sai dos thresholds.
//!
//! ## Uso
//! ```bash
//! crop_ingest                  # config.toml ao lado do executável
//! crop_ingest /etc/crop.toml   # caminho explícito
//! ```
//!
//! `Ctrl+C` encerra: para de aceitar mensagens, esvazia a fila e desconecta.

use crop_core::alerts::AlertTracker;
use crop_core::config::AppConfig;
use crop_ingest::{
    work_queue, Dispatcher, JsonStore, MqttListener, Pipeline, PipelineStats, SmtpNotifier, Store,
    WorkerPool,
};
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config_path = AppConfig::default_path();
    let mut config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }
    config.apply_env_overrides();

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("Configuração inválida: {e}");
        }
        return ExitCode::FAILURE;
    }

    // ── Armazenamento ──
    let data_dir = config.data_dir(&config_path);
    let store: Arc<dyn Store> = match JsonStore::open(&data_dir, &config.settings) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Falha ao abrir armazenamento: {e}");
            return ExitCode::FAILURE;
        }
    };

    // ── Notificações ──
    let dispatcher = if config.smtp.is_configured() {
        match SmtpNotifier::new(&config.smtp) {
            Ok(n) => Some(Dispatcher::new(Arc::new(n))),
            Err(e) => {
                error!("SMTP inválido, notificações desativadas: {e}");
                None
            }
        }
    } else {
        warn!("SMTP não configurado (smtp.from_email vazio), notificações desativadas");
        None
    };
    let notifications = if dispatcher.is_some() { "SMTP" } else { "desativadas" };

    // ── Pipeline + workers ──
    let stats = Arc::new(PipelineStats::default());
    let pipeline = Arc::new(
        Pipeline::new(store, AlertTracker::new(config.pipeline.dedup), dispatcher)
            .with_stats(stats.clone()),
    );
    let (queue_tx, queue_rx) = work_queue(config.pipeline.queue_capacity, stats.clone());
    let pool = WorkerPool::start(pipeline, queue_rx, config.pipeline.workers);

    // ── MQTT ──
    let listener = match MqttListener::start(&config.mqtt, queue_tx) {
        Ok(l) => l,
        Err(e) => {
            error!("{e}");
            pool.shutdown(Duration::from_secs_f64(config.pipeline.shutdown_timeout_secs));
            return ExitCode::FAILURE;
        }
    };

    // ── Ctrl+C ──
    // `stop_tx` fica vivo até o encerramento.
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let handler_tx = stop_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = handler_tx.try_send(());
    }) {
        warn!("Não foi possível instalar handler de Ctrl+C: {e}");
    }

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   🌱 SMART CROP INGEST – ATIVO (Rust)");
    println!("══════════════════════════════════════════════");
    println!("  Broker:       {}:{}", config.mqtt.broker, config.mqtt.port);
    println!("  Tópico:       {}", config.mqtt.topic);
    println!("  Dados:        {}", data_dir.display());
    println!("  Workers:      {} (fila {})", config.pipeline.workers, config.pipeline.queue_capacity);
    println!("  Notificações: {notifications}");
    println!("══════════════════════════════════════════════");
    println!();

    // ── Loop principal: status periódico até Ctrl+C ──
    let status_every = match config.pipeline.status_interval_secs {
        0 => Duration::MAX,
        secs => Duration::from_secs(secs),
    };
    loop {
        match stop_rx.recv_timeout(status_every) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let s = stats.snapshot();
                info!(
                    "Status: MQTT {} | recebidas {} | descartadas {} | rejeitadas {} | processadas {} | alertas {} | e-mails {}/{} falhas | erros de persistência {}",
                    if listener.is_connected() { "conectado" } else { "desconectado" },
                    s.received,
                    s.dropped,
                    s.rejected,
                    s.processed,
                    s.alerts_raised,
                    s.notifications_sent,
                    s.notifications_failed,
                    s.persistence_failures
                );
            }
        }
    }

    // ── Encerramento ──
    drop(stop_tx);
    info!("Encerrando...");
    listener.stop_accepting();
    pool.shutdown(Duration::from_secs_f64(config.pipeline.shutdown_timeout_secs));
    listener.shutdown();
    info!("Até logo");
    ExitCode::SUCCESS
}
