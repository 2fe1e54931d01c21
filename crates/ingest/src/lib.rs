//! # Crop Ingest
//!
//! Recebe leituras do dispositivo via MQTT, persiste, avalia thresholds e
//! envia alertas por e-mail.
//!
//! ## Módulos
//! - [`listener`] – Conexão MQTT e máquina de estados
//! - [`worker`] – Fila limitada e pool de workers
//! - [`pipeline`] – Processamento de uma mensagem ponta a ponta
//! - [`dispatch`] – Renderização + envio SMTP
//! - [`store`] – Persistência (memória / diretório JSON)

pub mod dispatch;
pub mod listener;
pub mod pipeline;
pub mod store;
pub mod worker;

pub use dispatch::{Dispatcher, Notifier, SmtpNotifier};
pub use listener::{ListenerError, MqttListener};
pub use pipeline::{Pipeline, PipelineStats, ProcessOutcome};
pub use store::{JsonStore, MemoryStore, Store};
pub use worker::{work_queue, WorkerPool};
