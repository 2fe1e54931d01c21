//! Fila de trabalho limitada e pool de workers do pipeline.
//!
//! A thread MQTT nunca bloqueia: [`QueueSender::offer`] usa `try_send` e
//! descarta a mensagem mais nova quando a fila está cheia. Os workers
//! consomem a fila e chamam [`Pipeline::process`] para cada payload.

use crate::pipeline::{Pipeline, PipelineStats};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Intervalo de polling dos workers enquanto a fila está vazia.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cria a fila limitada. O lado de envio fica com o listener.
pub fn work_queue(capacity: usize, stats: Arc<PipelineStats>) -> (QueueSender, Receiver<Vec<u8>>) {
    let (tx, rx) = bounded::<Vec<u8>>(capacity);
    (QueueSender { tx, stats }, rx)
}

/// Lado produtor da fila.
#[derive(Clone)]
pub struct QueueSender {
    tx: Sender<Vec<u8>>,
    stats: Arc<PipelineStats>,
}

impl QueueSender {
    /// Enfileira sem bloquear. Retorna `false` se a mensagem foi descartada.
    pub fn offer(&self, payload: Vec<u8>) -> bool {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(p)) => {
                warn!("Fila cheia, descartando mensagem de {} bytes", p.len());
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Fila fechada, mensagem ignorada");
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

// ──────────────────────────────────────────────
// Pool de workers
// ──────────────────────────────────────────────

/// Workers de longa duração (`pipeline-worker-N`).
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    done_rx: Receiver<usize>,
    closing: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Inicia `workers` threads consumindo `queue`.
    pub fn start(pipeline: Arc<Pipeline>, queue: Receiver<Vec<u8>>, workers: usize) -> Self {
        let closing = Arc::new(AtomicBool::new(false));
        let abort = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = bounded::<usize>(workers);

        let handles = (0..workers)
            .map(|n| {
                let pipeline = pipeline.clone();
                let queue = queue.clone();
                let closing = closing.clone();
                let abort = abort.clone();
                let done_tx = done_tx.clone();
                std::thread::Builder::new()
                    .name(format!("pipeline-worker-{n}"))
                    .spawn(move || {
                        worker_loop(&pipeline, &queue, &closing, &abort);
                        debug!("Worker {n} encerrado");
                        let _ = done_tx.send(n);
                    })
                    .expect("Falha ao criar thread de worker")
            })
            .collect();

        info!("{workers} workers do pipeline iniciados");
        Self {
            handles,
            done_rx,
            closing,
            abort,
        }
    }

    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    /// Esvazia a fila e aguarda os workers até `timeout`.
    ///
    /// Retorna `true` se todos terminaram no prazo. No timeout, os workers
    /// param de pegar novos itens e as threads são abandonadas.
    pub fn shutdown(self, timeout: Duration) -> bool {
        self.closing.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + timeout;
        let total = self.handles.len();

        let mut finished = 0;
        while finished < total {
            match self.done_rx.recv_deadline(deadline) {
                Ok(_) => finished += 1,
                Err(_) => break,
            }
        }

        if finished < total {
            self.abort.store(true, Ordering::SeqCst);
            error!(
                "Timeout de {:.1}s no encerramento: {} de {total} workers ainda ativos, abandonando",
                timeout.as_secs_f64(),
                total - finished
            );
            return false;
        }

        for handle in self.handles {
            if handle.join().is_err() {
                error!("Worker terminou com panic");
            }
        }
        info!("Workers encerrados, fila esvaziada");
        true
    }
}

fn worker_loop(pipeline: &Pipeline, queue: &Receiver<Vec<u8>>, closing: &AtomicBool, abort: &AtomicBool) {
    loop {
        if abort.load(Ordering::SeqCst) {
            break;
        }
        match queue.recv_timeout(POLL_INTERVAL) {
            Ok(payload) => {
                pipeline.process(&payload);
            }
            Err(RecvTimeoutError::Timeout) => {
                if closing.load(Ordering::SeqCst) && queue.is_empty() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
