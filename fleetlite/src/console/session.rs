//! Expect-style session over a VM's serial console.
//!
//! Output is matched against a pending window: the bytes read since the
//! previous successful match. Prompts like `login: ` do not end in a newline,
//! so matching never waits for line boundaries. `read_until` frames output on
//! a fixed delimiter byte for callers that want discrete units.
//!
//! Nothing in this layer retries. A timeout or closed stream goes straight to
//! the caller.

use super::{ConsoleIo, ConsoleTranscript, SerialLog};
use fleetlite_shared::{FleetError, FleetResult};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const DEFAULT_SEND_DELIMITER: &str = "\n";
pub const DEFAULT_FRAME_DELIMITER: u8 = b' ';

/// Upper bound of the pending window; the older half is dropped past this.
const MAX_PENDING: usize = 64 * 1024;
const READ_CHUNK: usize = 4096;

pub struct ConsoleSession {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    pending: Vec<u8>,
    send_delimiter: String,
    frame_delimiter: u8,
    serial_log: Option<SerialLog>,
    transcript: Option<ConsoleTranscript>,
    closed: bool,
}

impl ConsoleSession {
    pub fn new(io: ConsoleIo) -> Self {
        Self {
            reader: io.reader,
            writer: io.writer,
            pending: Vec::new(),
            send_delimiter: DEFAULT_SEND_DELIMITER.to_string(),
            frame_delimiter: DEFAULT_FRAME_DELIMITER,
            serial_log: None,
            transcript: None,
            closed: false,
        }
    }

    pub fn with_delimiters(mut self, send: impl Into<String>, frame: u8) -> Self {
        self.send_delimiter = send.into();
        self.frame_delimiter = frame;
        self
    }

    pub fn with_serial_log(mut self, log: SerialLog) -> Self {
        self.serial_log = Some(log);
        self
    }

    pub fn with_transcript(mut self, transcript: ConsoleTranscript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// Write `line` followed by the send delimiter.
    pub async fn send(&mut self, line: &str) -> FleetResult<()> {
        self.record("send", &format!("{:?}", line));
        self.write_line(line).await
    }

    /// Like `send`, but the transcript records a placeholder.
    pub async fn send_secret(&mut self, line: &str) -> FleetResult<()> {
        self.record("send", "\"******\"");
        self.write_line(line).await
    }

    async fn write_line(&mut self, line: &str) -> FleetResult<()> {
        let mut bytes = Vec::with_capacity(line.len() + self.send_delimiter.len());
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(self.send_delimiter.as_bytes());

        let result = async {
            self.writer.write_all(&bytes).await?;
            self.writer.flush().await
        }
        .await;

        result.map_err(|e| {
            tracing::debug!(error = %e, "Console write failed");
            self.record("closed", "write failed");
            FleetError::StreamClosed {
                during: "send".to_string(),
            }
        })
    }

    /// Consume output until `pattern` appears.
    ///
    /// # Errors
    /// - `Timeout` if `timeout` elapses first
    /// - `StreamClosed` if the stream ends (the VM process exited)
    pub async fn wait_for(&mut self, pattern: &str, timeout: Duration) -> FleetResult<()> {
        self.wait_for_any(&[pattern], timeout).await.map(|_| ())
    }

    /// Consume output until one of `patterns` appears; returns its index.
    ///
    /// If several patterns are present, the one that ends earliest in the
    /// stream wins.
    pub async fn wait_for_any(&mut self, patterns: &[&str], timeout: Duration) -> FleetResult<usize> {
        let description = describe(patterns);
        self.record("expect", &format!("{} within {:?}", description, timeout));
        let start = Instant::now();

        let result = tokio::time::timeout(timeout, async {
            loop {
                if let Some((index, end)) = find_earliest(&self.pending, patterns) {
                    self.pending.drain(..end);
                    return Ok(index);
                }
                self.fill(&description).await?;
            }
        })
        .await;

        match result {
            Ok(Ok(index)) => {
                self.record(
                    "matched",
                    &format!("{:?} after {:?}", patterns[index], start.elapsed()),
                );
                Ok(index)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                self.record("timeout", &format!("{} after {:?}", description, timeout));
                Err(FleetError::Timeout {
                    pattern: description,
                    timeout,
                })
            }
        }
    }

    /// Read one frame: everything up to and including the frame delimiter.
    pub async fn read_until(&mut self, timeout: Duration) -> FleetResult<String> {
        let delimiter = self.frame_delimiter;
        let description = format!("frame delimiter {:?}", delimiter as char);

        let result = tokio::time::timeout(timeout, async {
            loop {
                if let Some(pos) = self.pending.iter().position(|&b| b == delimiter) {
                    let frame: Vec<u8> = self.pending.drain(..=pos).collect();
                    return Ok(String::from_utf8_lossy(&frame).into_owned());
                }
                self.fill(&description).await?;
            }
        })
        .await;

        match result {
            Ok(frame) => frame,
            Err(_) => {
                self.record("timeout", &format!("{} after {:?}", description, timeout));
                Err(FleetError::Timeout {
                    pattern: description,
                    timeout,
                })
            }
        }
    }

    /// Keep reading console output into the serial log until the stream
    /// closes. A guest blocks once an unread console pipe fills up.
    pub async fn drain(&mut self) {
        while self.fill("end of stream").await.is_ok() {
            self.pending.clear();
        }
    }

    /// Decoded view of output read but not yet consumed by a match.
    pub fn pending_text(&self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }

    /// Read one chunk into the pending window.
    async fn fill(&mut self, waiting_for: &str) -> FleetResult<()> {
        let closed = || FleetError::StreamClosed {
            during: format!("wait for {}", waiting_for),
        };
        if self.closed {
            return Err(closed());
        }

        let mut chunk = [0u8; READ_CHUNK];
        let n = match self.reader.read(&mut chunk).await {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "Console read failed");
                0
            }
        };
        if n == 0 {
            self.closed = true;
            self.record("closed", &format!("while waiting for {}", waiting_for));
            return Err(closed());
        }

        if let Some(log) = self.serial_log.as_mut() {
            log.append(&chunk[..n]);
        }
        self.pending.extend_from_slice(&chunk[..n]);
        if self.pending.len() > MAX_PENDING {
            let excess = self.pending.len() - MAX_PENDING / 2;
            self.pending.drain(..excess);
        }
        Ok(())
    }

    fn record(&mut self, kind: &str, detail: &str) {
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.record(kind, detail);
        }
    }
}

fn describe(patterns: &[&str]) -> String {
    match patterns {
        [single] => format!("{:?}", single),
        many => format!("any of {:?}", many),
    }
}

/// Find the pattern whose first occurrence ends earliest in `haystack`.
///
/// Returns `(pattern index, end offset)`.
fn find_earliest(haystack: &[u8], patterns: &[&str]) -> Option<(usize, usize)> {
    patterns
        .iter()
        .enumerate()
        .filter(|(_, pattern)| !pattern.is_empty())
        .filter_map(|(index, pattern)| {
            let needle = pattern.as_bytes();
            haystack
                .windows(needle.len())
                .position(|window| window == needle)
                .map(|start| (index, start + needle.len()))
        })
        .min_by_key(|&(_, end)| end)
}
