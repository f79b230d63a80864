//! The streaming relay: pull one chunk, forward it, repeat.
//!
//! At most one chunk is in flight per session, so memory use is bounded by
//! `max_chunk_size` no matter how long the upstream keeps producing.

use std::{fmt, sync::Arc, time::Duration};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{CoreError, CoreResult, UpstreamError},
    metrics::RelayMetrics,
    session::{RelaySession, SessionState},
    transport::ClientWriter,
    upstream::Upstream,
};

/// Upper bound on how long a terminal marker may take to reach the transport.
const TERMINAL_MARKER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Abort if the upstream produces nothing for this long.
    pub max_idle_timeout: Duration,
    /// Largest payload a single chunk may carry.
    pub max_chunk_size: usize,
    /// Flush the transport after every forwarded chunk.
    pub flush_every_chunk: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_idle_timeout: Duration::from_secs(30),
            max_chunk_size: 1024 * 1024,
            flush_every_chunk: true,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_idle_timeout.is_zero() {
            return Err(CoreError::Config {
                field: "max_idle_timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_chunk_size == 0 {
            return Err(CoreError::Config {
                field: "max_chunk_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Why a relay session stopped before the upstream was exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    UpstreamFailed(UpstreamError),
    /// No chunk arrived within `max_idle_timeout`.
    Timeout,
    ClientDisconnected,
    ChunkTooLarge { size: usize, limit: usize },
    /// Upstream skipped or repeated a sequence index.
    SequenceGap { expected: u64, got: u64 },
    /// The governing request was cancelled (shutdown, deadline).
    Cancelled,
}

impl AbortReason {
    /// Stable machine-readable name, used in logs and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AbortReason::UpstreamFailed(_) => "upstream_failed",
            AbortReason::Timeout => "timeout",
            AbortReason::ClientDisconnected => "client_disconnected",
            AbortReason::ChunkTooLarge { .. } => "chunk_too_large",
            AbortReason::SequenceGap { .. } => "sequence_gap",
            AbortReason::Cancelled => "cancelled",
        }
    }

    /// Failures attributed to the provider side.
    pub fn is_upstream(&self) -> bool {
        matches!(self, AbortReason::UpstreamFailed(_) | AbortReason::Timeout)
    }

    /// Whether a fresh session against the same upstream might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AbortReason::Timeout
                | AbortReason::UpstreamFailed(UpstreamError::RateLimited(_))
                | AbortReason::UpstreamFailed(UpstreamError::Connection(_))
        )
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::UpstreamFailed(e) => write!(f, "{e}"),
            AbortReason::Timeout => write!(f, "upstream idle timeout exceeded"),
            AbortReason::ClientDisconnected => write!(f, "client disconnected"),
            AbortReason::ChunkTooLarge { size, limit } => {
                write!(f, "chunk of {size} bytes exceeds limit of {limit} bytes")
            }
            AbortReason::SequenceGap { expected, got } => {
                write!(f, "expected chunk {expected}, upstream sent {got}")
            }
            AbortReason::Cancelled => write!(f, "relay cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayResult {
    Completed {
        total_chunks: u64,
        total_bytes: u64,
    },
    Aborted {
        reason: AbortReason,
        chunks_forwarded: u64,
        bytes_forwarded: u64,
    },
}

impl RelayResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, RelayResult::Completed { .. })
    }

    pub fn chunks_forwarded(&self) -> u64 {
        match self {
            RelayResult::Completed { total_chunks, .. } => *total_chunks,
            RelayResult::Aborted { chunks_forwarded, .. } => *chunks_forwarded,
        }
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match self {
            RelayResult::Completed { .. } => None,
            RelayResult::Aborted { reason, .. } => Some(reason),
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            RelayResult::Completed { .. } => "completed",
            RelayResult::Aborted { reason, .. } => reason.kind(),
        }
    }
}

/// Summary of a finished session, handed to the dispatcher for logging.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub state: SessionState,
    pub outcome: &'static str,
    pub chunks_forwarded: u64,
    pub bytes_forwarded: u64,
    pub elapsed_ms: u64,
}

/// A configured relay ready to run one session.
#[derive(Debug, Clone)]
pub struct Relay {
    config: RelayConfig,
    metrics: Option<Arc<RelayMetrics>>,
    cancel: CancellationToken,
    session_id: Option<Uuid>,
}

impl Relay {
    /// Fails fast on invalid configuration, before any chunk is pulled.
    pub fn new(config: RelayConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            metrics: None,
            cancel: CancellationToken::new(),
            session_id: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<RelayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_session_id(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub async fn run<U, W>(self, upstream: U, writer: W) -> RelayResult
    where
        U: Upstream,
        W: ClientWriter,
    {
        self.run_with_report(upstream, writer).await.0
    }

    pub async fn run_with_report<U, W>(self, mut upstream: U, mut writer: W) -> (RelayResult, SessionReport)
    where
        U: Upstream,
        W: ClientWriter,
    {
        let _active = self.metrics.as_ref().map(|m| m.begin_session());
        let mut session = match self.session_id {
            Some(id) => RelaySession::with_id(id),
            None => RelaySession::new(),
        };
        debug!(session_id = %session.session_id(), "Relay session opened");

        let outcome = self.pump(&mut session, &mut upstream, &mut writer).await;
        upstream.release().await;

        let result = match outcome {
            Ok(()) => self.drain(&mut session, &mut writer).await,
            Err(reason) => {
                if reason != AbortReason::ClientDisconnected {
                    self.send_abort_marker(&mut writer, &reason).await;
                }
                set_state(&mut session, SessionState::Failed);
                RelayResult::Aborted {
                    reason,
                    chunks_forwarded: session.chunks_forwarded(),
                    bytes_forwarded: session.bytes_forwarded(),
                }
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record(&result);
        }

        let report = SessionReport {
            session_id: session.session_id(),
            state: session.state(),
            outcome: result.outcome(),
            chunks_forwarded: session.chunks_forwarded(),
            bytes_forwarded: session.bytes_forwarded(),
            elapsed_ms: session.elapsed().as_millis() as u64,
        };

        match &result {
            RelayResult::Completed { .. } => info!(
                session_id = %report.session_id,
                outcome = report.outcome,
                chunks = report.chunks_forwarded,
                bytes = report.bytes_forwarded,
                elapsed_ms = report.elapsed_ms,
                "Relay session finished"
            ),
            RelayResult::Aborted { reason, .. } => warn!(
                session_id = %report.session_id,
                outcome = report.outcome,
                reason = %reason,
                chunks = report.chunks_forwarded,
                bytes = report.bytes_forwarded,
                elapsed_ms = report.elapsed_ms,
                "Relay session aborted"
            ),
        }

        (result, report)
    }

    /// Pull/forward loop. `Ok(())` means the upstream signalled its end.
    async fn pump<U, W>(
        &self,
        session: &mut RelaySession,
        upstream: &mut U,
        writer: &mut W,
    ) -> Result<(), AbortReason>
    where
        U: Upstream,
        W: ClientWriter,
    {
        loop {
            let pulled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(AbortReason::Cancelled),
                _ = writer.closed() => return Err(AbortReason::ClientDisconnected),
                pulled = tokio::time::timeout(self.config.max_idle_timeout, upstream.pull()) => pulled,
            };

            let chunk = match pulled {
                Err(_) => return Err(AbortReason::Timeout),
                Ok(Err(e)) => return Err(AbortReason::UpstreamFailed(e)),
                Ok(Ok(None)) => return Ok(()),
                Ok(Ok(Some(chunk))) => chunk,
            };

            let expected = session.next_sequence_index();
            if chunk.sequence_index != expected {
                return Err(AbortReason::SequenceGap {
                    expected,
                    got: chunk.sequence_index,
                });
            }
            if chunk.len() > self.config.max_chunk_size {
                return Err(AbortReason::ChunkTooLarge {
                    size: chunk.len(),
                    limit: self.config.max_chunk_size,
                });
            }

            let written = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(AbortReason::Cancelled),
                written = writer.write_chunk(&chunk) => written,
            };
            if let Err(e) = written {
                debug!(session_id = %session.session_id(), error = %e, "Transport write failed");
                return Err(AbortReason::ClientDisconnected);
            }
            session.record_forwarded(chunk.len());

            if self.config.flush_every_chunk {
                let flushed = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(AbortReason::Cancelled),
                    flushed = writer.flush() => flushed,
                };
                if flushed.is_err() {
                    return Err(AbortReason::ClientDisconnected);
                }
            }

            if chunk.is_final {
                return Ok(());
            }
        }
    }

    async fn drain<W: ClientWriter>(&self, session: &mut RelaySession, writer: &mut W) -> RelayResult {
        set_state(session, SessionState::Draining);

        let finished = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AbortReason::Cancelled),
            finished = tokio::time::timeout(TERMINAL_MARKER_TIMEOUT, writer.finish()) => match finished {
                Ok(Ok(())) => Ok(()),
                _ => Err(AbortReason::ClientDisconnected),
            },
        };

        match finished {
            Ok(()) => {
                set_state(session, SessionState::Closed);
                RelayResult::Completed {
                    total_chunks: session.chunks_forwarded(),
                    total_bytes: session.bytes_forwarded(),
                }
            }
            Err(reason) => {
                set_state(session, SessionState::Failed);
                RelayResult::Aborted {
                    reason,
                    chunks_forwarded: session.chunks_forwarded(),
                    bytes_forwarded: session.bytes_forwarded(),
                }
            }
        }
    }

    async fn send_abort_marker<W: ClientWriter>(&self, writer: &mut W, reason: &AbortReason) {
        match tokio::time::timeout(TERMINAL_MARKER_TIMEOUT, writer.abort(reason)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Abort marker not delivered"),
            Err(_) => debug!("Abort marker timed out"),
        }
    }
}

fn set_state(session: &mut RelaySession, next: SessionState) {
    if let Err(e) = session.transition(next) {
        warn!(session_id = %session.session_id(), error = %e, "Ignoring session transition");
    }
}

/// Relay `upstream` into `writer` under `config`.
///
/// Returns `Err` only for invalid configuration; every runtime failure is
/// reported as [`RelayResult::Aborted`].
pub async fn relay<U, W>(upstream: U, writer: W, config: &RelayConfig) -> CoreResult<RelayResult>
where
    U: Upstream,
    W: ClientWriter,
{
    let relay = Relay::new(config.clone())?;
    Ok(relay.run(upstream, writer).await)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{chunk::StreamChunk, error::TransportError};

    // ── Scripted upstream ─────────────────────────────────────────────────────

    enum Step {
        Chunk(StreamChunk),
        Fail(UpstreamError),
        Stall,
    }

    #[derive(Clone, Default)]
    struct Tracker {
        pulls: Arc<AtomicUsize>,
        released: Arc<AtomicBool>,
    }

    struct ScriptedUpstream {
        steps: VecDeque<Step>,
        tracker: Tracker,
    }

    impl ScriptedUpstream {
        fn new(steps: Vec<Step>) -> (Self, Tracker) {
            let tracker = Tracker::default();
            (
                Self {
                    steps: steps.into(),
                    tracker: tracker.clone(),
                },
                tracker,
            )
        }

        fn texts(parts: &[&str]) -> (Self, Tracker) {
            let steps = parts
                .iter()
                .enumerate()
                .map(|(i, p)| Step::Chunk(StreamChunk::new(i as u64, p.to_string())))
                .collect();
            Self::new(steps)
        }
    }

    #[async_trait]
    impl Upstream for ScriptedUpstream {
        async fn pull(&mut self) -> Result<Option<StreamChunk>, UpstreamError> {
            self.tracker.pulls.fetch_add(1, Ordering::SeqCst);
            match self.steps.pop_front() {
                Some(Step::Chunk(chunk)) => Ok(Some(chunk)),
                Some(Step::Fail(e)) => Err(e),
                Some(Step::Stall) => futures::future::pending().await,
                None => Ok(None),
            }
        }

        async fn release(&mut self) {
            self.tracker.released.store(true, Ordering::SeqCst);
        }
    }

    // ── Recording writer ──────────────────────────────────────────────────────

    #[derive(Clone, Default)]
    struct Sink {
        chunks: Arc<Mutex<Vec<StreamChunk>>>,
        aborts: Arc<Mutex<Vec<AbortReason>>>,
        finished: Arc<AtomicBool>,
        flushes: Arc<AtomicUsize>,
    }

    impl Sink {
        fn payloads(&self) -> Vec<String> {
            self.chunks
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.text_lossy().into_owned())
                .collect()
        }

        fn indices(&self) -> Vec<u64> {
            self.chunks.lock().unwrap().iter().map(|c| c.sequence_index).collect()
        }
    }

    struct RecordingWriter {
        sink: Sink,
        fail_at_write: Option<usize>,
        close_signal: Option<tokio::sync::oneshot::Receiver<()>>,
    }

    impl RecordingWriter {
        fn new() -> (Self, Sink) {
            let sink = Sink::default();
            (
                Self {
                    sink: sink.clone(),
                    fail_at_write: None,
                    close_signal: None,
                },
                sink,
            )
        }

        fn failing_at(index: usize) -> (Self, Sink) {
            let (mut writer, sink) = Self::new();
            writer.fail_at_write = Some(index);
            (writer, sink)
        }
    }

    #[async_trait]
    impl ClientWriter for RecordingWriter {
        async fn write_chunk(&mut self, chunk: &StreamChunk) -> Result<(), TransportError> {
            let mut chunks = self.sink.chunks.lock().unwrap();
            if self.fail_at_write == Some(chunks.len()) {
                return Err(TransportError::Disconnected);
            }
            chunks.push(chunk.clone());
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), TransportError> {
            self.sink.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn finish(&mut self) -> Result<(), TransportError> {
            self.sink.finished.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn abort(&mut self, reason: &AbortReason) -> Result<(), TransportError> {
            self.sink.aborts.lock().unwrap().push(reason.clone());
            Ok(())
        }

        async fn closed(&mut self) {
            match self.close_signal.as_mut() {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => futures::future::pending().await,
            }
        }
    }

    fn config() -> RelayConfig {
        RelayConfig {
            max_idle_timeout: Duration::from_secs(5),
            max_chunk_size: 64,
            flush_every_chunk: false,
        }
    }

    // ── Happy path ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_hello_world_completes_with_contiguous_indices() {
        let (upstream, _) = ScriptedUpstream::texts(&["Hello", " ", "world"]);
        let (writer, sink) = RecordingWriter::new();

        let result = relay(upstream, writer, &config()).await.unwrap();

        assert_eq!(result, RelayResult::Completed { total_chunks: 3, total_bytes: 11 });
        assert_eq!(sink.indices(), vec![0, 1, 2]);
        assert_eq!(sink.payloads().concat(), "Hello world");
        assert!(sink.finished.load(Ordering::SeqCst));
        assert!(sink.aborts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forwards_every_chunk_for_various_lengths() {
        for n in [0usize, 1, 2, 17, 100] {
            let parts: Vec<String> = (0..n).map(|i| format!("t{i}")).collect();
            let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
            let (upstream, _) = ScriptedUpstream::texts(&refs);
            let (writer, sink) = RecordingWriter::new();

            let result = relay(upstream, writer, &config()).await.unwrap();

            let total_bytes: u64 = parts.iter().map(|p| p.len() as u64).sum();
            assert_eq!(result, RelayResult::Completed { total_chunks: n as u64, total_bytes });
            assert_eq!(sink.indices(), (0..n as u64).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_final_chunk_stops_pulling() {
        let (upstream, tracker) = ScriptedUpstream::new(vec![
            Step::Chunk(StreamChunk::new(0, "a")),
            Step::Chunk(StreamChunk::final_chunk(1, "b")),
            Step::Chunk(StreamChunk::new(2, "never")),
        ]);
        let (writer, sink) = RecordingWriter::new();

        let result = relay(upstream, writer, &config()).await.unwrap();

        assert_eq!(result, RelayResult::Completed { total_chunks: 2, total_bytes: 2 });
        assert_eq!(tracker.pulls.load(Ordering::SeqCst), 2);
        assert_eq!(sink.payloads(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_flush_every_chunk_flushes_after_each_write() {
        let (upstream, _) = ScriptedUpstream::texts(&["a", "b", "c"]);
        let (writer, sink) = RecordingWriter::new();
        let cfg = RelayConfig { flush_every_chunk: true, ..config() };

        relay(upstream, writer, &cfg).await.unwrap();

        assert_eq!(sink.flushes.load(Ordering::SeqCst), 3);
    }

    // ── Upstream failures ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_upstream_failure_after_k_chunks() {
        for k in [0usize, 1, 3] {
            let mut steps: Vec<Step> = (0..k)
                .map(|i| Step::Chunk(StreamChunk::new(i as u64, "x")))
                .collect();
            steps.push(Step::Fail(UpstreamError::RateLimited("429".into())));
            steps.push(Step::Chunk(StreamChunk::new(k as u64, "late")));
            let (upstream, tracker) = ScriptedUpstream::new(steps);
            let (writer, sink) = RecordingWriter::new();

            let result = relay(upstream, writer, &config()).await.unwrap();

            assert_eq!(
                result,
                RelayResult::Aborted {
                    reason: AbortReason::UpstreamFailed(UpstreamError::RateLimited("429".into())),
                    chunks_forwarded: k as u64,
                    bytes_forwarded: k as u64,
                }
            );
            assert_eq!(sink.indices(), (0..k as u64).collect::<Vec<_>>());
            assert_eq!(sink.aborts.lock().unwrap().len(), 1, "terminal abort marker expected");
            assert!(!sink.finished.load(Ordering::SeqCst));
            assert!(tracker.released.load(Ordering::SeqCst));
            assert_eq!(tracker.pulls.load(Ordering::SeqCst), k + 1, "no pulls after the failure");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_aborts_with_timeout() {
        let (upstream, tracker) = ScriptedUpstream::new(vec![
            Step::Chunk(StreamChunk::new(0, "first")),
            Step::Stall,
            Step::Chunk(StreamChunk::new(1, "too late")),
        ]);
        let (writer, sink) = RecordingWriter::new();

        let result = relay(upstream, writer, &config()).await.unwrap();

        assert_eq!(
            result,
            RelayResult::Aborted {
                reason: AbortReason::Timeout,
                chunks_forwarded: 1,
                bytes_forwarded: 5,
            }
        );
        assert_eq!(sink.payloads(), vec!["first"]);
        assert_eq!(sink.aborts.lock().unwrap().as_slice(), &[AbortReason::Timeout]);
        assert_eq!(tracker.pulls.load(Ordering::SeqCst), 2);
        assert!(AbortReason::Timeout.is_upstream());
    }

    // ── Local policy ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_oversized_chunk_is_never_forwarded() {
        let big = "x".repeat(65);
        let (upstream, tracker) = ScriptedUpstream::new(vec![
            Step::Chunk(StreamChunk::new(0, "ok")),
            Step::Chunk(StreamChunk::new(1, "fine")),
            Step::Chunk(StreamChunk::new(2, big)),
            Step::Chunk(StreamChunk::new(3, "after")),
        ]);
        let (writer, sink) = RecordingWriter::new();

        let result = relay(upstream, writer, &config()).await.unwrap();

        assert_eq!(
            result,
            RelayResult::Aborted {
                reason: AbortReason::ChunkTooLarge { size: 65, limit: 64 },
                chunks_forwarded: 2,
                bytes_forwarded: 6,
            }
        );
        assert_eq!(sink.payloads(), vec!["ok", "fine"]);
        assert_eq!(tracker.pulls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_chunk_at_exact_limit_is_forwarded() {
        let exact = "y".repeat(64);
        let (upstream, _) = ScriptedUpstream::texts(&[exact.as_str()]);
        let (writer, _) = RecordingWriter::new();

        let result = relay(upstream, writer, &config()).await.unwrap();
        assert!(result.is_completed());
    }

    #[tokio::test]
    async fn test_sequence_gap_is_reported() {
        let (upstream, _) = ScriptedUpstream::new(vec![
            Step::Chunk(StreamChunk::new(0, "a")),
            Step::Chunk(StreamChunk::new(2, "c")),
        ]);
        let (writer, sink) = RecordingWriter::new();

        let result = relay(upstream, writer, &config()).await.unwrap();

        assert_eq!(
            result.abort_reason(),
            Some(&AbortReason::SequenceGap { expected: 1, got: 2 })
        );
        assert_eq!(sink.payloads(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_duplicate_index_is_reported() {
        let (upstream, _) = ScriptedUpstream::new(vec![
            Step::Chunk(StreamChunk::new(0, "a")),
            Step::Chunk(StreamChunk::new(0, "a")),
        ]);
        let (writer, sink) = RecordingWriter::new();

        let result = relay(upstream, writer, &config()).await.unwrap();

        assert_eq!(
            result.abort_reason(),
            Some(&AbortReason::SequenceGap { expected: 1, got: 0 })
        );
        assert_eq!(sink.indices(), vec![0]);
    }

    // ── Transport failures ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_client_disconnect_stops_pulling_within_one_cycle() {
        for k in [0usize, 2, 4] {
            let (upstream, tracker) = ScriptedUpstream::texts(&["a", "b", "c", "d", "e", "f"]);
            let (writer, sink) = RecordingWriter::failing_at(k);

            let result = relay(upstream, writer, &config()).await.unwrap();

            assert_eq!(
                result,
                RelayResult::Aborted {
                    reason: AbortReason::ClientDisconnected,
                    chunks_forwarded: k as u64,
                    bytes_forwarded: k as u64,
                }
            );
            assert_eq!(tracker.pulls.load(Ordering::SeqCst), k + 1);
            assert!(tracker.released.load(Ordering::SeqCst));
            assert!(sink.aborts.lock().unwrap().is_empty(), "no marker to a gone client");
        }
    }

    #[tokio::test]
    async fn test_closed_transport_interrupts_pending_pull() {
        let (upstream, tracker) = ScriptedUpstream::new(vec![
            Step::Chunk(StreamChunk::new(0, "a")),
            Step::Stall,
        ]);
        let (mut writer, sink) = RecordingWriter::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        writer.close_signal = Some(rx);

        let handle = tokio::spawn(async move { relay(upstream, writer, &config()).await });
        tokio::task::yield_now().await;
        tx.send(()).unwrap();

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.abort_reason(), Some(&AbortReason::ClientDisconnected));
        assert!(tracker.released.load(Ordering::SeqCst));
        assert!(sink.chunks.lock().unwrap().len() <= 1);
    }

    // ── Cancellation & metrics ────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_pending_pull() {
        let (upstream, tracker) = ScriptedUpstream::new(vec![
            Step::Chunk(StreamChunk::new(0, "a")),
            Step::Chunk(StreamChunk::new(1, "b")),
            Step::Stall,
        ]);
        let (writer, sink) = RecordingWriter::new();
        let token = CancellationToken::new();
        let cfg = RelayConfig {
            max_idle_timeout: Duration::from_secs(60),
            ..config()
        };
        let relay = Relay::new(cfg).unwrap().with_cancellation(token.clone());

        let handle = tokio::spawn(relay.run(upstream, writer));
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();

        let result = handle.await.unwrap();
        assert_eq!(
            result,
            RelayResult::Aborted {
                reason: AbortReason::Cancelled,
                chunks_forwarded: 2,
                bytes_forwarded: 2,
            }
        );
        assert_eq!(sink.payloads(), vec!["a", "b"]);
        assert!(tracker.released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_metrics_account_for_sessions() {
        let metrics = RelayMetrics::new();

        let (upstream, _) = ScriptedUpstream::texts(&["ab", "c"]);
        let (writer, _) = RecordingWriter::new();
        let (result, report) = Relay::new(config())
            .unwrap()
            .with_metrics(metrics.clone())
            .run_with_report(upstream, writer)
            .await;
        assert!(result.is_completed());
        assert_eq!(report.state, SessionState::Closed);
        assert_eq!(report.outcome, "completed");

        let (upstream, _) = ScriptedUpstream::new(vec![Step::Fail(UpstreamError::Other("boom".into()))]);
        let (writer, _) = RecordingWriter::new();
        let (_, report) = Relay::new(config())
            .unwrap()
            .with_metrics(metrics.clone())
            .run_with_report(upstream, writer)
            .await;
        assert_eq!(report.state, SessionState::Failed);

        let snap = metrics.snapshot();
        assert_eq!(snap.active_sessions, 0);
        assert_eq!(snap.completed_sessions, 1);
        assert_eq!(snap.aborted_sessions, 1);
        assert_eq!(snap.bytes_forwarded, 3);
    }

    // ── Configuration ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_zero_idle_timeout_is_rejected_before_pulling() {
        let (upstream, tracker) = ScriptedUpstream::texts(&["a"]);
        let (writer, _) = RecordingWriter::new();
        let cfg = RelayConfig { max_idle_timeout: Duration::ZERO, ..config() };

        let err = relay(upstream, writer, &cfg).await.unwrap_err();

        assert!(matches!(err, CoreError::Config { ref field, .. } if field == "max_idle_timeout"));
        assert_eq!(tracker.pulls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let cfg = RelayConfig { max_chunk_size: 0, ..RelayConfig::default() };
        assert!(Relay::new(cfg).is_err());
    }

    #[test]
    fn test_retryable_reasons() {
        assert!(AbortReason::Timeout.is_retryable());
        assert!(AbortReason::UpstreamFailed(UpstreamError::Connection("x".into())).is_retryable());
        assert!(!AbortReason::UpstreamFailed(UpstreamError::Protocol("x".into())).is_retryable());
        assert!(!AbortReason::ChunkTooLarge { size: 2, limit: 1 }.is_retryable());
        assert!(!AbortReason::ClientDisconnected.is_upstream());
    }
}
