//! Envio de notificações de alerta.
//!
//! [`Dispatcher`] renderiza o alerta com [`crop_core::render`] e entrega via
//! um [`Notifier`]. Em produção o notifier é o [`SmtpNotifier`] (STARTTLS
//! com `lettre`). Não há retry: falha fica registrada no log e o alerta
//! permanece com `notified = false`.

use crop_core::config::SmtpConfig;
use crop_core::render::{render_alert, RenderedNotification};
use crop_core::types::Alert;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Erros de envio de notificação.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Endereço de e-mail inválido: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Erro ao montar mensagem: {0}")]
    Build(String),

    #[error("Erro no transporte: {0}")]
    Transport(String),
}

/// Resultado da entrega de um alerta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Sent,
    Failed(String),
}

/// Transporte de notificações já renderizadas.
pub trait Notifier: Send + Sync {
    fn send(&self, destination: &str, notification: &RenderedNotification) -> Result<(), DispatchError>;
}

/// Renderiza e entrega alertas.
#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub fn dispatch(&self, alert: &Alert, destination: &str) -> DispatchResult {
        let notification = render_alert(alert);
        match self.notifier.send(destination, &notification) {
            Ok(()) => {
                info!("✉ Alerta {} enviado para {destination}", alert.alert_type);
                DispatchResult::Sent
            }
            Err(e) => {
                warn!("Falha ao enviar alerta {} para {destination}: {e}", alert.alert_type);
                DispatchResult::Failed(e.to_string())
            }
        }
    }
}

// ──────────────────────────────────────────────
// SMTP
// ──────────────────────────────────────────────

/// Notifier via relay SMTP autenticado (STARTTLS).
pub struct SmtpNotifier {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, DispatchError> {
        let from = Mailbox::new(
            Some(config.from_name.clone()).filter(|n| !n.is_empty()),
            config.from_email.parse()?,
        );

        let mut builder = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| DispatchError::Transport(e.to_string()))?
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        info!(
            "SMTP configurado: {}:{} (remetente {})",
            config.host, config.port, config.from_email
        );

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

impl Notifier for SmtpNotifier {
    fn send(&self, destination: &str, notification: &RenderedNotification) -> Result<(), DispatchError> {
        let email = build_message(&self.from, destination, notification)?;
        self.transport
            .send(&email)
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        Ok(())
    }
}

/// Monta a mensagem multipart (texto + HTML).
fn build_message(
    from: &Mailbox,
    destination: &str,
    notification: &RenderedNotification,
) -> Result<Message, DispatchError> {
    Message::builder()
        .from(from.clone())
        .to(destination.parse()?)
        .subject(notification.subject.clone())
        .multipart(MultiPart::alternative_plain_html(
            notification.text.clone(),
            notification.html.clone(),
        ))
        .map_err(|e| DispatchError::Build(e.to_string()))
}
