//! Session pump
//!
//! Owns the connected stream once a session is installed. A drain task
//! continuously pulls inbound bytes into a shared buffer and wakes
//! whoever is waiting: a one-shot read, a `read_until` accumulation, or
//! a standing subscription. Outbound writes go through the writer half
//! behind its own lock, independent of the state machine's lock, so a
//! slow write can never block an unrelated transition.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use common::{LinkError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{debug, trace, warn};
use transport::ByteStream;

use crate::scan::DelimiterScanner;
use crate::state::{Completion, ConnectionState, Role, SessionInfo};

/// Slot holding the active session's pump, shared between the façade and
/// the role workers
pub(crate) type PumpSlot<S> = Arc<tokio::sync::RwLock<Option<Arc<SessionPump<S>>>>>;

/// Install a freshly connected stream as the active session.
///
/// The phase transition is decided atomically against the state machine;
/// the pump goes into the slot before the pending completion resolves,
/// so a caller woken by success always finds the session in place.
/// Returns false when the state machine rejected the stream, in which
/// case the stream is dropped (closed) here.
pub(crate) async fn install_session<S: ByteStream>(
    stream: S,
    peer: transport::PeerInfo,
    role: Role,
    state: &Arc<ConnectionState>,
    slot: &PumpSlot<S>,
    read_chunk: usize,
) -> bool {
    let session = SessionInfo {
        peer: peer.clone(),
        role,
        established_at: std::time::Instant::now(),
    };

    match state.try_complete(session) {
        Completion::Installed(pending) => {
            let pump = SessionPump::spawn(stream, state.clone(), read_chunk);
            *slot.write().await = Some(pump);
            tracing::info!("Session established with {} as {:?}", peer.addr, role);
            if let Some(tx) = pending {
                let _ = tx.send(Ok(()));
            }
            true
        }
        Completion::Rejected => {
            debug!("Rejecting stream from {}: no attempt in progress", peer.addr);
            false
        }
    }
}

/// Stream liveness as observed by the pump
#[derive(Debug, Clone, PartialEq, Eq)]
enum Status {
    Open,
    /// Remote side finished writing; buffered bytes are still served
    Eof,
    /// Stream I/O failed; the session has been torn down
    Failed(String),
    /// Closed locally by disconnect or shutdown
    Closed,
}

/// What the inbound side is currently serving.
///
/// A subscribed session does not service plain reads, and only one
/// one-shot read may wait at a time.
enum ReadMode {
    Idle,
    Reading,
    Subscribed(Arc<Notify>),
}

struct Shared {
    buf: StdMutex<BytesMut>,
    status: StdMutex<Status>,
    readable: Notify,
    state: Arc<ConnectionState>,
}

impl Shared {
    fn lock_buf(&self) -> MutexGuard<'_, BytesMut> {
        self.buf.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn status(&self) -> Status {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_status(&self, next: Status) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Record EOF unless a terminal status already won
    fn set_eof(&self) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if *status == Status::Open {
            *status = Status::Eof;
        }
    }

    /// Record a fatal stream failure and tear the session down
    fn fail(&self, message: String) {
        {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            match *status {
                Status::Open | Status::Eof => *status = Status::Failed(message),
                Status::Failed(_) | Status::Closed => return,
            }
        }
        self.readable.notify_waiters();
        self.state.connection_lost();
    }
}

/// Per-session worker owning the stream's two halves
pub(crate) struct SessionPump<S: ByteStream> {
    shared: Arc<Shared>,
    writer: Mutex<Option<WriteHalf<S>>>,
    /// Stops the drain task; notify_one so the permit survives races
    close: Notify,
    mode: StdMutex<ReadMode>,
    read_chunk: usize,
}

impl<S: ByteStream> SessionPump<S> {
    /// Take ownership of a connected stream and start draining it.
    pub(crate) fn spawn(stream: S, state: Arc<ConnectionState>, read_chunk: usize) -> Arc<Self> {
        let (reader, writer) = tokio::io::split(stream);
        let pump = Arc::new(Self {
            shared: Arc::new(Shared {
                buf: StdMutex::new(BytesMut::new()),
                status: StdMutex::new(Status::Open),
                readable: Notify::new(),
                state,
            }),
            writer: Mutex::new(Some(writer)),
            close: Notify::new(),
            mode: StdMutex::new(ReadMode::Idle),
            read_chunk: read_chunk.max(1),
        });

        tokio::spawn(Self::drain_loop(pump.clone(), reader));
        pump
    }

    /// Inbound drain: socket -> shared buffer, one wakeup per chunk
    async fn drain_loop(pump: Arc<Self>, mut reader: ReadHalf<S>) {
        let mut chunk = vec![0u8; pump.read_chunk];
        loop {
            tokio::select! {
                _ = pump.close.notified() => {
                    trace!("Drain loop stopping: local close");
                    break;
                }
                res = reader.read(&mut chunk) => match res {
                    Ok(0) => {
                        debug!("Session stream reached EOF");
                        pump.shared.set_eof();
                        pump.shared.readable.notify_waiters();
                        break;
                    }
                    Ok(n) => {
                        trace!("Buffered {} inbound byte(s)", n);
                        pump.shared.lock_buf().extend_from_slice(&chunk[..n]);
                        pump.shared.readable.notify_waiters();
                    }
                    Err(e) => {
                        warn!("Read failed on session stream: {}", e);
                        pump.shared.fail(e.to_string());
                        break;
                    }
                }
            }
        }
    }

    fn lock_mode(&self) -> MutexGuard<'_, ReadMode> {
        self.mode.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// True while the stream reports itself open
    pub(crate) fn is_open(&self) -> bool {
        self.shared.status() == Status::Open
    }

    /// True once the stream failed or was locally closed
    pub(crate) fn dead(&self) -> bool {
        matches!(self.shared.status(), Status::Failed(_) | Status::Closed)
    }

    /// Bytes buffered and ready without blocking
    pub(crate) fn available(&self) -> Result<usize> {
        if self.shared.status() == Status::Closed {
            return Err(LinkError::NotConnected);
        }
        Ok(self.shared.lock_buf().len())
    }

    /// Write the full buffer to the stream.
    ///
    /// A write error is fatal: the session is torn down and the caller
    /// gets the specific I/O error.
    pub(crate) async fn write_all(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(w) = writer.as_mut() else {
            return Err(LinkError::NotConnected);
        };

        let res = match w.write_all(data).await {
            Ok(()) => w.flush().await,
            Err(e) => Err(e),
        };

        match res {
            Ok(()) => {
                trace!("Wrote {} byte(s)", data.len());
                Ok(())
            }
            Err(e) => {
                warn!("Write failed on session stream: {}", e);
                *writer = None;
                drop(writer);
                self.shared.fail(e.to_string());
                self.close.notify_one();
                Err(LinkError::Io(e))
            }
        }
    }

    /// Block until at least one byte is buffered, return up to the
    /// configured chunk size.
    pub(crate) async fn read_once(&self) -> Result<Bytes> {
        let _guard = self.begin_read()?;
        loop {
            let notified = self.shared.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let status = self.shared.status();
                if status == Status::Closed {
                    return Err(LinkError::NotConnected);
                }
                let mut buf = self.shared.lock_buf();
                if !buf.is_empty() {
                    let n = buf.len().min(self.read_chunk);
                    return Ok(buf.split_to(n).freeze());
                }
                drop(buf);
                match status {
                    Status::Eof => {
                        return Err(LinkError::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "stream ended before any data",
                        )));
                    }
                    Status::Failed(msg) => {
                        return Err(LinkError::Io(std::io::Error::other(msg)));
                    }
                    Status::Open | Status::Closed => {}
                }
            }

            notified.await;
        }
    }

    /// Accumulate bytes until the buffer's suffix equals `delimiter`,
    /// then return the whole accumulation, delimiter included.
    ///
    /// EOF before a match is `NoData`; the partial accumulation is
    /// discarded, not returned.
    pub(crate) async fn read_until(&self, delimiter: &[u8]) -> Result<Bytes> {
        let _guard = self.begin_read()?;
        let mut scanner = DelimiterScanner::new(delimiter);
        let mut out = BytesMut::new();
        loop {
            match self.pop_byte().await? {
                Some(byte) => {
                    out.put_u8(byte);
                    if scanner.push(byte) {
                        return Ok(out.freeze());
                    }
                }
                None => return Err(LinkError::NoData),
            }
        }
    }

    /// Start a standing subscription.
    ///
    /// Bytes buffered before the subscription are stale and dropped.
    /// Each inbound byte is then emitted immediately as its own chunk;
    /// the subscription ends cleanly once the emitted tail matches the
    /// delimiter, or with `NoData` if the stream ends first.
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        delimiter: Vec<u8>,
    ) -> Result<mpsc::UnboundedReceiver<Result<Bytes>>> {
        let cancel = Arc::new(Notify::new());
        {
            let mut mode = self.lock_mode();
            match &*mode {
                ReadMode::Idle => *mode = ReadMode::Subscribed(cancel.clone()),
                ReadMode::Reading => return Err(LinkError::AlreadyActive("read")),
                ReadMode::Subscribed(_) => return Err(LinkError::AlreadyActive("subscription")),
            }
        }

        self.shared.lock_buf().clear();

        let (tx, rx) = mpsc::unbounded_channel();
        let pump = self.clone();
        tokio::spawn(async move {
            let mut scanner = DelimiterScanner::new(delimiter);
            debug!("Subscription started");
            loop {
                tokio::select! {
                    _ = cancel.notified() => {
                        debug!("Subscription cancelled");
                        break;
                    }
                    res = pump.pop_byte() => match res {
                        Ok(Some(byte)) => {
                            let matched = scanner.push(byte);
                            if tx.send(Ok(Bytes::copy_from_slice(&[byte]))).is_err() {
                                debug!("Subscriber dropped, ending subscription");
                                break;
                            }
                            if matched {
                                debug!("Delimiter matched, subscription complete");
                                break;
                            }
                        }
                        Ok(None) => {
                            let _ = tx.send(Err(LinkError::NoData));
                            break;
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            break;
                        }
                    }
                }
            }

            let mut mode = pump.lock_mode();
            if let ReadMode::Subscribed(token) = &*mode {
                if Arc::ptr_eq(token, &cancel) {
                    *mode = ReadMode::Idle;
                }
            }
        });

        Ok(rx)
    }

    /// End any standing subscription and return to one-shot mode,
    /// discarding buffered unread bytes.
    pub(crate) fn unsubscribe(&self) {
        {
            let mut mode = self.lock_mode();
            if let ReadMode::Subscribed(token) = &*mode {
                token.notify_one();
                *mode = ReadMode::Idle;
            }
        }
        self.shared.lock_buf().clear();
    }

    /// Close the session's stream.
    ///
    /// Wakes every blocked reader with a closed status; reported as
    /// success by the caller even if the stream was already half-closed.
    pub(crate) async fn close(&self) {
        self.unsubscribe();
        self.shared.set_status(Status::Closed);
        self.shared.readable.notify_waiters();
        self.close.notify_one();

        let mut writer = self.writer.lock().await;
        if let Some(mut w) = writer.take() {
            if let Err(e) = w.shutdown().await {
                debug!("Shutdown during close: {}", e);
            }
        }
        debug!("Session stream closed");
    }

    /// Take the next buffered byte, waiting for one if none is ready.
    ///
    /// `Ok(None)` is EOF with an empty buffer; local close and stream
    /// failure surface as errors so blocked readers never hang.
    async fn pop_byte(&self) -> Result<Option<u8>> {
        loop {
            let notified = self.shared.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let status = self.shared.status();
                if status == Status::Closed {
                    return Err(LinkError::NotConnected);
                }
                let mut buf = self.shared.lock_buf();
                if buf.has_remaining() {
                    return Ok(Some(buf.get_u8()));
                }
                drop(buf);
                match status {
                    Status::Eof => return Ok(None),
                    Status::Failed(msg) => {
                        return Err(LinkError::Io(std::io::Error::other(msg)));
                    }
                    Status::Open | Status::Closed => {}
                }
            }

            notified.await;
        }
    }

    fn begin_read(&self) -> Result<ReadGuard<'_, S>> {
        let mut mode = self.lock_mode();
        match &*mode {
            ReadMode::Idle => {
                *mode = ReadMode::Reading;
                Ok(ReadGuard { pump: self })
            }
            ReadMode::Reading => Err(LinkError::AlreadyActive("read")),
            ReadMode::Subscribed(_) => Err(LinkError::AlreadyActive("subscription")),
        }
    }
}

/// Releases the one-shot read slot when the read completes or is dropped
struct ReadGuard<'a, S: ByteStream> {
    pump: &'a SessionPump<S>,
}

impl<S: ByteStream> Drop for ReadGuard<'_, S> {
    fn drop(&mut self) {
        let mut mode = self.pump.lock_mode();
        if matches!(*mode, ReadMode::Reading) {
            *mode = ReadMode::Idle;
        }
    }
}
