//! Thread MQTT que assina o tópico de leituras e alimenta a fila de trabalho.
//!
//! O loop de eventos do `rumqttc` roda numa thread nomeada (`mqtt-listener`).
//! Quedas de conexão são transitórias: o loop espera `reconnect_delay_secs`
//! e volta a fazer polling, e cada ConnAck refaz a assinatura. Só a falha
//! da primeira conexão é fatal para o processo.

use crate::worker::QueueSender;
use crop_core::config::MqttConfig;
use crossbeam_channel::{bounded, Sender};
use rumqttc::{Client, Connection, ConnectionError, Event, MqttOptions, Outgoing, Packet, QoS};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Erros do listener. Todos são fatais no startup.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Falha na conexão inicial com o broker: {0}")]
    InitialConnect(String),

    #[error("Broker não respondeu em {0}s")]
    Timeout(u64),

    #[error("Falha ao criar thread MQTT: {0}")]
    Spawn(#[from] std::io::Error),
}

// ──────────────────────────────────────────────
// Máquina de estados da conexão
// ──────────────────────────────────────────────

/// Estado da conexão com o broker (pertence à thread MQTT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected { subscribed: bool },
    Reconnecting,
}

/// Eventos que movem a máquina de estados.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    ConnAck,
    Subscribed,
    Refused,
    Dropped,
    Shutdown,
}

impl ConnectionState {
    pub fn next(self, event: ConnectionEvent) -> ConnectionState {
        use ConnectionEvent as E;
        use ConnectionState as S;
        match (self, event) {
            (_, E::Shutdown) => S::Disconnected,
            (S::Disconnected | S::Reconnecting, E::Connect) => S::Connecting,
            (S::Connecting, E::ConnAck) => S::Connected { subscribed: false },
            (S::Connected { .. }, E::Subscribed) => S::Connected { subscribed: true },
            (S::Connecting, E::Refused | E::Dropped) => S::Reconnecting,
            (S::Connected { .. }, E::Dropped | E::Refused) => S::Reconnecting,
            (state, _) => state,
        }
    }

    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

// ──────────────────────────────────────────────
// Listener
// ──────────────────────────────────────────────

#[derive(Debug, Default)]
struct Shared {
    connected: AtomicBool,
    /// Publicações só vão para a fila enquanto `true`
    accepting: AtomicBool,
    stopping: AtomicBool,
}

/// Listener MQTT com start/shutdown explícitos.
pub struct MqttListener {
    client: Client,
    handle: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl MqttListener {
    /// Conecta, assina o tópico e aguarda o primeiro ConnAck por até
    /// `connect_timeout_secs`.
    pub fn start(config: &MqttConfig, queue: QueueSender) -> Result<Self, ListenerError> {
        let mut options = MqttOptions::new(&config.client_id, &config.broker, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        let (client, connection) = Client::new(options, 64);

        let shared = Arc::new(Shared {
            accepting: AtomicBool::new(true),
            ..Default::default()
        });
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);

        info!(
            "Conectando a {}:{} como '{}' (tópico {})",
            config.broker, config.port, config.client_id, config.topic
        );

        let handle = {
            let client = client.clone();
            let shared = shared.clone();
            let topic = config.topic.clone();
            let delay = Duration::try_from_secs_f64(config.reconnect_delay_secs)
                .unwrap_or(Duration::from_secs(2));
            std::thread::Builder::new()
                .name("mqtt-listener".into())
                .spawn(move || {
                    event_loop(connection, &client, &topic, &shared, &queue, delay, ready_tx);
                })?
        };

        let timeout = config.connect_timeout_secs;
        let outcome = ready_rx.recv_timeout(Duration::from_secs(timeout));

        let listener = Self {
            client,
            handle: Some(handle),
            shared,
        };
        match outcome {
            Ok(Ok(())) => Ok(listener),
            Ok(Err(reason)) => {
                listener.abandon();
                Err(ListenerError::InitialConnect(reason))
            }
            Err(_) => {
                listener.abandon();
                Err(ListenerError::Timeout(timeout))
            }
        }
    }

    /// Indica se há sessão ativa com o broker.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Novas publicações passam a ser descartadas.
    pub fn stop_accepting(&self) {
        self.shared.accepting.store(false, Ordering::SeqCst);
        debug!("Listener não aceita mais mensagens");
    }

    /// Desconecta do broker e aguarda a thread.
    pub fn shutdown(mut self) {
        self.stop_accepting();
        self.shared.stopping.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect não enviado: {e}");
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Thread MQTT terminou com panic");
            }
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        info!("Listener MQTT encerrado");
    }

    /// Encerra sem esperar a thread (startup falhou).
    fn abandon(self) {
        self.shared.accepting.store(false, Ordering::SeqCst);
        self.shared.stopping.store(true, Ordering::SeqCst);
        let _ = self.client.try_disconnect();
    }
}

/// Entrega uma publicação à fila, respeitando `stop_accepting`.
fn forward_publish(shared: &Shared, queue: &QueueSender, payload: &[u8]) -> bool {
    if !shared.accepting.load(Ordering::SeqCst) {
        debug!("Encerrando, publicação de {} bytes ignorada", payload.len());
        return false;
    }
    queue.offer(payload.to_vec())
}

/// Assinatura do tópico (o `Client` em produção).
trait Subscriber {
    fn subscribe(&self, topic: &str) -> Result<(), String>;
}

impl Subscriber for Client {
    fn subscribe(&self, topic: &str) -> Result<(), String> {
        self.try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| e.to_string())
    }
}

/// O que o loop faz depois de tratar uma notificação.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// Esperar `reconnect_delay` e voltar a fazer polling
    Reconnect,
    Stop,
}

/// Estado da thread MQTT entre notificações.
struct Session<'a, S: Subscriber> {
    subscriber: &'a S,
    topic: &'a str,
    shared: &'a Shared,
    queue: &'a QueueSender,
    state: ConnectionState,
    ready: Option<Sender<Result<(), String>>>,
}

impl<'a, S: Subscriber> Session<'a, S> {
    fn new(
        subscriber: &'a S,
        topic: &'a str,
        shared: &'a Shared,
        queue: &'a QueueSender,
        ready: Sender<Result<(), String>>,
    ) -> Self {
        Self {
            subscriber,
            topic,
            shared,
            queue,
            state: ConnectionState::Disconnected.next(ConnectionEvent::Connect),
            ready: Some(ready),
        }
    }

    fn handle(&mut self, notification: Result<Event, ConnectionError>) -> Flow {
        let flow = match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                self.state = self.state.next(ConnectionEvent::ConnAck);
                self.shared.connected.store(true, Ordering::SeqCst);
                info!("✓ Conectado ao broker MQTT");

                if let Err(e) = self.subscriber.subscribe(self.topic) {
                    error!("Falha ao assinar {}: {e}", self.topic);
                }
                if let Some(tx) = self.ready.take() {
                    let _ = tx.send(Ok(()));
                }
                Flow::Continue
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                self.state = self.state.next(ConnectionEvent::Subscribed);
                info!("Assinado em {}", self.topic);
                Flow::Continue
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if self.state.is_connected() {
                    forward_publish(self.shared, self.queue, &publish.payload);
                }
                Flow::Continue
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("Disconnect enviado ao broker");
                Flow::Stop
            }
            Ok(_) => Flow::Continue,
            Err(e) => self.connection_error(e),
        };

        if flow == Flow::Continue
            && self.shared.stopping.load(Ordering::SeqCst)
            && !self.state.is_connected()
        {
            return Flow::Stop;
        }
        flow
    }

    fn connection_error(&mut self, e: ConnectionError) -> Flow {
        self.shared.connected.store(false, Ordering::SeqCst);
        if self.shared.stopping.load(Ordering::SeqCst) {
            return Flow::Stop;
        }
        if let Some(tx) = self.ready.take() {
            let _ = tx.send(Err(e.to_string()));
            return Flow::Stop;
        }
        let event = match e {
            ConnectionError::ConnectionRefused(code) => {
                warn!("Broker recusou a conexão: {code:?}");
                ConnectionEvent::Refused
            }
            other => {
                warn!("Conexão MQTT perdida: {other}");
                ConnectionEvent::Dropped
            }
        };
        self.state = self.state.next(event);
        Flow::Reconnect
    }

    /// Nova tentativa de conexão depois da pausa.
    fn resume(&mut self) {
        self.state = self.state.next(ConnectionEvent::Connect);
    }

    fn finish(&mut self) {
        self.state = self.state.next(ConnectionEvent::Shutdown);
        self.shared.connected.store(false, Ordering::SeqCst);
        debug!("Loop MQTT finalizado ({:?})", self.state);
    }
}

fn event_loop(
    mut connection: Connection,
    client: &Client,
    topic: &str,
    shared: &Shared,
    queue: &QueueSender,
    reconnect_delay: Duration,
    ready_tx: Sender<Result<(), String>>,
) {
    let mut session = Session::new(client, topic, shared, queue, ready_tx);

    for notification in connection.iter() {
        match session.handle(notification) {
            Flow::Continue => {}
            Flow::Reconnect => {
                debug!(
                    "Tentando novamente em {:.1}s...",
                    reconnect_delay.as_secs_f64()
                );
                std::thread::sleep(reconnect_delay);
                session.resume();
            }
            Flow::Stop => break,
        }
    }

    session.finish();
}
