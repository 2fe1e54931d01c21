//! # Smart Crop Simulator
//!
//! Simula o ESP32 da estufa: gera leituras aleatórias e publica no tópico
//! MQTT configurado, no mesmo formato JSON do dispositivo real.
//!
//! ## Uso
//! ```bash
//! crop_simulator                  # config.toml ao lado do executável
//! crop_simulator /etc/crop.toml   # caminho explícito
//! ```

use chrono::Utc;
use crop_core::config::AppConfig;
use crop_core::protocol::encode_reading;
use crop_core::types::SensorReading;
use rand::Rng;
use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Faixas sorteadas por grandeza. Ultrapassam os thresholds padrão.
const SOIL_RANGE: (f64, f64) = (20.0, 80.0);
const TEMPERATURE_RANGE: (f64, f64) = (15.0, 40.0);
const HUMIDITY_RANGE: (f64, f64) = (30.0, 90.0);
const LIGHT_RANGE: (f64, f64) = (1000.0, 60000.0);

fn main() {
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
        std::process::exit(1);
    }

    let mqtt = &config.mqtt;
    let sim = &config.simulator;
    let interval = Duration::from_secs_f64(sim.interval_secs);

    // ── Cliente MQTT ──
    let mut options = MqttOptions::new(&sim.client_id, &mqtt.broker, mqtt.port);
    options.set_keep_alive(Duration::from_secs(mqtt.keep_alive_secs));
    let (client, mut connection) = Client::new(options, 16);

    let reconnect_delay = Duration::from_secs_f64(mqtt.reconnect_delay_secs);
    std::thread::Builder::new()
        .name("mqtt-simulator".into())
        .spawn(move || {
            for notification in connection.iter() {
                match notification {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => info!("✓ Conectado ao broker MQTT"),
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Conexão MQTT perdida: {e}. Tentando novamente...");
                        std::thread::sleep(reconnect_delay);
                    }
                }
            }
        })
        .expect("Falha ao criar thread MQTT");

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   🌱 SMART CROP SIMULATOR – ATIVO (Rust)");
    println!("══════════════════════════════════════════════");
    println!("  Broker:    {}:{}", mqtt.broker, mqtt.port);
    println!("  Tópico:    {}", mqtt.topic);
    println!("  Client ID: {}", sim.client_id);
    println!("  Intervalo: {:.1}s", interval.as_secs_f64());
    println!("══════════════════════════════════════════════");
    println!();

    // ── Loop principal ──
    let mut rng = rand::thread_rng();
    loop {
        let cycle_start = Instant::now();

        match random_reading(&mut rng) {
            Ok(reading) => {
                let frame = encode_reading(&reading);
                match client.try_publish(mqtt.topic.as_str(), QoS::AtMostOnce, false, frame) {
                    Ok(()) => info!(
                        "→ solo {:.1}% | {:.1}°C | ar {:.1}% | {:.0} lux",
                        reading.soil_moisture(),
                        reading.temperature(),
                        reading.humidity(),
                        reading.light_intensity()
                    ),
                    Err(e) => error!("Erro ao publicar leitura: {e}"),
                }
            }
            Err((quantity, value)) => debug!("Leitura fora do domínio ({quantity} = {value})"),
        }

        // Dormir pelo tempo restante do intervalo
        let elapsed = cycle_start.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }
}

/// Sorteia uma leitura com duas casas decimais.
fn random_reading(rng: &mut impl Rng) -> Result<SensorReading, (crop_core::types::Quantity, f64)> {
    let mut sample = |(lo, hi): (f64, f64)| (rng.gen_range(lo..=hi) * 100.0).round() / 100.0;
    SensorReading::new(
        sample(SOIL_RANGE),
        sample(TEMPERATURE_RANGE),
        sample(HUMIDITY_RANGE),
        sample(LIGHT_RANGE),
        Utc::now(),
    )
}
