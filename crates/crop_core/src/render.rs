//! Renderização das notificações de alerta (assunto, texto e HTML).

use crate::types::{Alert, AlertType, Direction, Quantity, Severity};

/// Nome exibido no cabeçalho e no rodapé das notificações.
pub const SYSTEM_NAME: &str = "Smart Crop Irrigation System";

/// Notificação pronta para envio.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedNotification {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Renderiza as três partes de uma notificação.
pub fn render_alert(alert: &Alert) -> RenderedNotification {
    RenderedNotification {
        subject: render_subject(alert),
        text: render_text(alert),
        html: render_html(alert),
    }
}

pub fn render_subject(alert: &Alert) -> String {
    format!("[Smart Crop] {}", alert_title(alert.alert_type))
}

/// Título legível (ex: "Umidade do solo baixa").
pub fn alert_title(alert_type: AlertType) -> String {
    let label = alert_type.quantity.label();
    match alert_type.direction {
        Direction::Low => format!("{label} baixa"),
        Direction::High => format!("{label} alta"),
    }
}

/// Ação recomendada por tipo de alerta.
pub fn recommendation(alert_type: AlertType) -> &'static str {
    use Direction::*;
    use Quantity::*;
    match (alert_type.quantity, alert_type.direction) {
        (SoilMoisture, Low) => {
            "Umidade do solo abaixo do ideal. Considere irrigar para evitar estresse hídrico."
        }
        (SoilMoisture, High) => {
            "Umidade do solo acima do ideal. Reduza a irrigação para evitar apodrecimento de raízes e fungos."
        }
        (Temperature, Low) => {
            "Temperatura abaixo da faixa ideal. Use coberturas de proteção ou leve as plantas para um local mais quente."
        }
        (Temperature, High) => {
            "Temperatura acima da faixa ideal. Providencie sombra, aumente a ventilação ou leve as plantas para um local mais fresco."
        }
        (Humidity, Low) => {
            "Umidade do ar abaixo do ideal. Aumente a nebulização ou use umidificadores para evitar desidratação."
        }
        (Humidity, High) => {
            "Umidade do ar acima do ideal. Melhore a circulação de ar para evitar fungos e doenças."
        }
        (LightIntensity, Low) => {
            "Luminosidade insuficiente. Leve as plantas para um local mais claro ou complemente com iluminação artificial."
        }
        (LightIntensity, High) => {
            "Luminosidade excessiva. Providencie sombra para evitar queimaduras nas folhas e estresse térmico."
        }
    }
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "#3b82f6",
        Severity::Warning => "#f59e0b",
        Severity::Critical => "#ef4444",
    }
}

pub fn render_text(alert: &Alert) -> String {
    let unit = alert.alert_type.quantity.unit();
    format!(
        "{SYSTEM_NAME} – Notificação de Alerta\n\
         \n\
         Tipo: {title}\n\
         Severidade: {severity}\n\
         Horário: {time}\n\
         \n\
         {message}\n\
         \n\
         Valor atual: {measured}{unit}\n\
         Limite: {threshold}{unit}\n\
         \n\
         Ação recomendada:\n\
         {action}\n\
         \n\
         ---\n\
         Alerta automático do {SYSTEM_NAME}.",
        title = alert_title(alert.alert_type),
        severity = alert.severity.as_str().to_uppercase(),
        time = alert.raised_at.format("%Y-%m-%d %H:%M:%S UTC"),
        message = alert.message,
        measured = alert.measured,
        threshold = alert.threshold,
        action = recommendation(alert.alert_type),
    )
}

pub fn render_html(alert: &Alert) -> String {
    let color = severity_color(alert.severity);
    let unit = escape_html(alert.alert_type.quantity.unit());
    format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
    <h1 style="margin: 0;">{system}</h1>
    <div style="border-left: 4px solid {color}; padding: 16px; margin: 20px 0;">
      <h2 style="color: {color}; margin-top: 0;">{title}</h2>
      <p><strong>Severidade:</strong> <span style="color: {color}; text-transform: uppercase;">{severity}</span></p>
      <p><strong>Horário:</strong> {time}</p>
      <p>{message}</p>
      <p><strong>Valor atual:</strong> {measured}{unit} &middot; <strong>Limite:</strong> {threshold}{unit}</p>
    </div>
    <div style="border-left: 4px solid #3b82f6; padding: 12px;">
      <h3 style="margin-top: 0;">Ação recomendada</h3>
      <p>{action}</p>
    </div>
    <p style="color: #6b7280; font-size: 12px;">Alerta automático do {system}.</p>
  </div>
</body>
</html>"#,
        system = SYSTEM_NAME,
        title = escape_html(&alert_title(alert.alert_type)),
        severity = alert.severity.as_str(),
        time = alert.raised_at.format("%Y-%m-%d %H:%M:%S UTC"),
        message = escape_html(&alert.message),
        measured = alert.measured,
        threshold = alert.threshold,
        action = escape_html(recommendation(alert.alert_type)),
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
