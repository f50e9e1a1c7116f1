/// Communication layer for the GDB/MI protocol
///
/// GDB handles one command at a time, so the correlator keeps a FIFO of
/// outgoing commands with at most one in flight. Each command is written
/// with a numeric token; the terminating result record of the in-flight
/// command resolves the caller's future directly.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::demux::LineDemultiplexer;
use crate::types::{ResultClass, ResultRecord, Value};
use crate::{DebuggerError, Result};

/// Successful outcome of a command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    pub class: ResultClass,
    pub results: HashMap<String, Value>,
    /// No terminating record arrived in time; the payload is empty
    pub timed_out: bool,
}

impl CommandReply {
    fn timed_out() -> Self {
        Self {
            class: ResultClass::Done,
            results: HashMap::new(),
            timed_out: true,
        }
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.results.get(key).and_then(Value::as_string)
    }
}

type ReplySender = oneshot::Sender<Result<CommandReply>>;

struct PendingCommand {
    command: String,
    enqueued_at: Instant,
    reply: ReplySender,
}

struct InFlight {
    token: u64,
    pending: PendingCommand,
    sent_at: Instant,
    timer: JoinHandle<()>,
}

struct Inner {
    queue: VecDeque<PendingCommand>,
    in_flight: Option<InFlight>,
    next_token: u64,
    open: bool,
    writer: mpsc::UnboundedSender<String>,
}

/// Serialises commands against a single GDB process
#[derive(Clone)]
pub struct Correlator {
    inner: Arc<Mutex<Inner>>,
    timeout: Duration,
}

impl Correlator {
    /// `writer` feeds the GDB stdin writer task
    pub fn new(writer: mpsc::UnboundedSender<String>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                queue: VecDeque::new(),
                in_flight: None,
                next_token: 1,
                open: true,
                writer,
            })),
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a command and wait for its outcome
    ///
    /// `^error` fails with [`DebuggerError::Command`]. A timeout resolves
    /// with an empty reply flagged `timed_out`.
    pub async fn send(&self, command: &str) -> Result<CommandReply> {
        let receiver = {
            let mut inner = self.lock();
            if !inner.open {
                return Err(DebuggerError::NotRunning);
            }
            let (reply, receiver) = oneshot::channel();
            inner.queue.push_back(PendingCommand {
                command: command.to_string(),
                enqueued_at: Instant::now(),
                reply,
            });
            self.pump(&mut inner);
            receiver
        };

        receiver
            .await
            .map_err(|_| DebuggerError::CommandDiscarded)?
    }

    /// Write text straight to GDB's stdin, bypassing the queue
    pub fn write_raw(&self, text: &str) -> Result<()> {
        let inner = self.lock();
        if !inner.open {
            return Err(DebuggerError::NotRunning);
        }
        inner
            .writer
            .send(format!("{}\n", text))
            .map_err(|_| DebuggerError::Communication("GDB stdin is closed".into()))
    }

    fn pump(&self, inner: &mut Inner) {
        while inner.in_flight.is_none() {
            let Some(pending) = inner.queue.pop_front() else {
                break;
            };
            let token = inner.next_token;
            inner.next_token += 1;

            let line = format!("{}{}\n", token, pending.command);
            if inner.writer.send(line).is_err() {
                log::error!("SEND[{}]: GDB stdin is closed, dropping {}", token, pending.command);
                let _ = pending
                    .reply
                    .send(Err(DebuggerError::Communication("GDB stdin is closed".into())));
                continue;
            }
            log::debug!(
                "SEND[{}]: {} (queued {:?})",
                token,
                pending.command,
                pending.enqueued_at.elapsed()
            );

            let this = self.clone();
            let timeout = self.timeout;
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                this.on_timeout(token);
            });

            inner.in_flight = Some(InFlight {
                token,
                pending,
                sent_at: Instant::now(),
                timer,
            });
        }
    }

    /// Resolve the in-flight command with its terminating record
    ///
    /// Returns false when the record did not belong to the in-flight
    /// command (nothing in flight, or a stale token).
    pub fn complete(&self, record: &ResultRecord) -> bool {
        let mut inner = self.lock();
        let token = match (&inner.in_flight, record.token) {
            (None, _) => {
                log::debug!("RECV: result {:?} with no command in flight", record.class);
                return false;
            }
            (Some(in_flight), Some(token)) if token != in_flight.token => {
                log::warn!(
                    "RECV[{}]: late result ignored, {} is in flight",
                    token,
                    in_flight.token
                );
                return false;
            }
            (Some(in_flight), _) => in_flight.token,
        };

        let Some(in_flight) = inner.in_flight.take() else {
            return false;
        };
        in_flight.timer.abort();

        let outcome = match record.class {
            ResultClass::Error => {
                let message = record.message();
                log::warn!("RECV[{}]: {} failed: {}", token, in_flight.pending.command, message);
                Err(DebuggerError::Command(message))
            }
            class => {
                log::debug!(
                    "RECV[{}]: {:?} in {:?}",
                    token,
                    class,
                    in_flight.sent_at.elapsed()
                );
                Ok(CommandReply {
                    class,
                    results: record.results.clone(),
                    timed_out: false,
                })
            }
        };
        let _ = in_flight.pending.reply.send(outcome);

        self.pump(&mut inner);
        true
    }

    fn on_timeout(&self, token: u64) {
        let mut inner = self.lock();
        if inner.in_flight.as_ref().map(|f| f.token) != Some(token) {
            return;
        }
        if let Some(in_flight) = inner.in_flight.take() {
            log::warn!(
                "SEND[{}]: {} timed out after {:?}, resolving with an empty reply",
                token,
                in_flight.pending.command,
                self.timeout
            );
            let _ = in_flight.pending.reply.send(Ok(CommandReply::timed_out()));
        }
        self.pump(&mut inner);
    }

    /// A command has been written and not answered yet
    pub fn is_busy(&self) -> bool {
        self.lock().in_flight.is_some()
    }

    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Discard commands that were queued but not yet written
    pub fn flush_queued(&self) -> usize {
        let mut inner = self.lock();
        let flushed = inner.queue.len();
        for pending in inner.queue.drain(..) {
            log::debug!("Discarding queued command: {}", pending.command);
            let _ = pending.reply.send(Err(DebuggerError::CommandDiscarded));
        }
        flushed
    }

    /// Refuse further commands and fail everything outstanding
    pub fn close(&self) {
        {
            let mut inner = self.lock();
            inner.open = false;
            if let Some(in_flight) = inner.in_flight.take() {
                in_flight.timer.abort();
                let _ = in_flight.pending.reply.send(Err(DebuggerError::CommandDiscarded));
            }
        }
        self.flush_queued();
    }
}

/// Write lines from the channel to GDB's stdin, in order
pub fn spawn_writer<W>(mut writer: W) -> (mpsc::UnboundedSender<String>, JoinHandle<()>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
    let task = tokio::spawn(async move {
        log::debug!("GDB stdin writer started");
        while let Some(line) = receiver.recv().await {
            log::trace!("GDB_IN: {}", line.trim_end());
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                log::error!("GDB stdin write error: {}", e);
                break;
            }
            if let Err(e) = writer.flush().await {
                log::error!("GDB stdin flush error: {}", e);
                break;
            }
        }
        log::debug!("GDB stdin writer finished");
    });
    (sender, task)
}

/// Receives complete lines from the stdout reader task
pub trait LineSink: Send + 'static {
    fn line(&mut self, line: &str);
    /// The stream reached EOF or failed
    fn closed(&mut self);
}

/// Read GDB's stdout in chunks, split into lines, hand them to `sink`
pub fn spawn_reader<R, S>(mut reader: R, mut sink: S) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    S: LineSink,
{
    tokio::spawn(async move {
        log::debug!("GDB stdout reader started");
        let mut demux = LineDemultiplexer::new();
        let mut chunk = vec![0u8; 8192];

        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    log::debug!("GDB stdout: EOF reached");
                    break;
                }
                Ok(n) => {
                    for line in demux.feed(&chunk[..n]) {
                        log::trace!("GDB_OUT: {}", line);
                        sink.line(&line);
                    }
                }
                Err(e) => {
                    log::error!("GDB stdout read error: {}", e);
                    break;
                }
            }
        }

        if let Some(line) = demux.finish() {
            sink.line(&line);
        }
        sink.closed();
        log::debug!("GDB stdout reader finished");
    })
}
