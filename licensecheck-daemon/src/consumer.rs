//! Event consumption -- JSON-lines source and bounded worker pool.
//!
//! [`EventSource`] is the boundary to the message bus: it decodes one
//! `{"id", "topic", "body"}` message per line. [`Consumer`] hands each
//! event to the pipeline driver on its own task, bounded by a semaphore,
//! and stops on end of input, cancellation, or the first fatal outcome.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use licensecheck_core::event::{Event, MAX_MESSAGE_SIZE};
use licensecheck_pipeline::{CommandRunner, LicenseReader, Outcome, PipelineDriver, SourceFetcher};

/// Longest line kept in memory: a full message plus `\r\n`.
const LINE_LIMIT: usize = MAX_MESSAGE_SIZE + 2;

/// Line-delimited JSON event reader.
///
/// At most [`LINE_LIMIT`] bytes of a line are held in memory; the rest of
/// an oversized line is discarded as it arrives.
pub struct EventSource<R> {
    reader: R,
    buf: Vec<u8>,
    /// Dropping the tail of an oversized line.
    discarding: bool,
    line_no: usize,
    skipped: usize,
}

impl<R: AsyncBufRead + Unpin> EventSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            discarding: false,
            line_no: 0,
            skipped: 0,
        }
    }

    /// Read the next event.
    ///
    /// Blank lines are ignored. Lines that do not decode, are not UTF-8, or
    /// exceed `MAX_MESSAGE_SIZE` are logged and skipped. Returns `Ok(None)`
    /// at end of input.
    ///
    /// Cancel safe: a partial line stays buffered until the next call.
    pub async fn next_event(&mut self) -> std::io::Result<Option<Event>> {
        loop {
            if self.discarding {
                self.discard_rest_of_line().await?;
                if self.discarding {
                    return Ok(None);
                }
                continue;
            }

            let limit = LINE_LIMIT.saturating_sub(self.buf.len()) as u64;
            (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .await?;

            let complete = self.buf.last() == Some(&b'\n');
            if !complete && self.buf.len() >= LINE_LIMIT {
                self.line_no += 1;
                self.skipped += 1;
                tracing::warn!(
                    line = self.line_no,
                    max = MAX_MESSAGE_SIZE,
                    "skipping oversized message"
                );
                self.buf.clear();
                self.discarding = true;
                continue;
            }
            // an unterminated line below the limit means end of input
            if self.buf.is_empty() {
                return Ok(None);
            }

            self.line_no += 1;
            let raw = std::mem::take(&mut self.buf);
            let line = match String::from_utf8(raw) {
                Ok(line) => line,
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!(line = self.line_no, error = %e, "skipping undecodable message");
                    continue;
                }
            };
            let line = line.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }
            match Event::from_json_line(line, self.line_no) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!(error = %e, "skipping undecodable message");
                }
            }
        }
    }

    /// Consume input up to and including the next newline.
    ///
    /// Leaves `discarding` set only when input ended first.
    async fn discard_rest_of_line(&mut self) -> std::io::Result<()> {
        loop {
            let chunk = self.reader.fill_buf().await?;
            if chunk.is_empty() {
                return Ok(());
            }
            let (used, found) = match chunk.iter().position(|&b| b == b'\n') {
                Some(end) => (end + 1, true),
                None => (chunk.len(), false),
            };
            self.reader.consume(used);
            if found {
                self.discarding = false;
                return Ok(());
            }
        }
    }

    /// Number of lines that could not be decoded.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

/// Totals for one consumer run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumerReport {
    pub received: usize,
    pub written: usize,
    pub ignored: usize,
    pub failed: usize,
    /// Undecodable input lines.
    pub skipped: usize,
    /// A fatal outcome stopped the consumer.
    pub fatal: bool,
}

impl ConsumerReport {
    fn record(&mut self, result: Result<Outcome, JoinError>) {
        match result {
            Ok(Outcome::Written(_)) => self.written += 1,
            Ok(Outcome::Ignored) => self.ignored += 1,
            Ok(outcome @ Outcome::Failed { .. }) => {
                self.failed += 1;
                self.fatal |= outcome.is_fatal();
            }
            Err(e) => {
                self.failed += 1;
                tracing::error!(error = %e, "pipeline task aborted");
            }
        }
    }
}

/// Dispatches events to the pipeline driver on a bounded worker pool.
pub struct Consumer<F, R, L>
where
    F: SourceFetcher,
    R: CommandRunner,
    L: LicenseReader,
{
    driver: Arc<PipelineDriver<F, R, L>>,
    max_concurrent: usize,
    cancel: CancellationToken,
}

impl<F, R, L> Consumer<F, R, L>
where
    F: SourceFetcher,
    R: CommandRunner,
    L: LicenseReader,
{
    /// `max_concurrent` is clamped to at least one worker.
    pub fn new(
        driver: Arc<PipelineDriver<F, R, L>>,
        max_concurrent: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            driver,
            max_concurrent: max_concurrent.max(1),
            cancel,
        }
    }

    /// Consume `source` until end of input, cancellation, or a fatal outcome.
    ///
    /// In-flight runs are always awaited before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the input fails.
    pub async fn run<S>(&self, mut source: EventSource<S>) -> anyhow::Result<ConsumerReport>
    where
        S: AsyncBufRead + Unpin,
    {
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        let mut report = ConsumerReport::default();

        tracing::info!(max_concurrent = self.max_concurrent, "consumer started");

        let read_result = loop {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(()),
                permit = Arc::clone(&permits).acquire_owned() => permit?,
            };

            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(()),
                next = source.next_event() => match next {
                    Ok(Some(event)) => event,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                },
            };

            report.received += 1;
            let driver = Arc::clone(&self.driver);
            let cancel = self.cancel.clone();
            tasks.spawn(async move {
                let outcome = driver.process(&event).await;
                // stop intake before the slot is released
                if outcome.is_fatal() {
                    cancel.cancel();
                }
                drop(permit);
                outcome
            });

            while let Some(result) = tasks.try_join_next() {
                report.record(result);
            }
        };

        if !tasks.is_empty() {
            tracing::info!(in_flight = tasks.len(), "waiting for in-flight runs");
        }
        while let Some(result) = tasks.join_next().await {
            report.record(result);
        }

        report.skipped = source.skipped();
        tracing::info!(
            received = report.received,
            written = report.written,
            ignored = report.ignored,
            failed = report.failed,
            skipped = report.skipped,
            fatal = report.fatal,
            "consumer stopped"
        );

        read_result.map_err(|e| anyhow::anyhow!("failed to read events: {}", e))?;
        Ok(report)
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
pub async fn wait_for_shutdown_signal() -> anyhow::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}
