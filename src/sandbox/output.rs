/// Bounded collection of child stdout/stderr
///
/// Each stream is drained by its own reader thread until EOF. Bytes past the
/// limit are read and discarded so the child never blocks on a full pipe.
use crate::sandbox::types::OutputIntegrity;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 8192;

/// Bytes collected from one stream
#[derive(Debug, Clone, Default)]
pub struct CollectedStream {
    pub data: Vec<u8>,
    pub integrity: OutputIntegrity,
    /// Bytes the child wrote, including discarded ones
    pub total_bytes: u64,
}

impl CollectedStream {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Handle to a stream being drained in the background
pub struct StreamCollector {
    rx: Receiver<CollectedStream>,
}

impl StreamCollector {
    pub fn spawn<R>(name: &str, reader: R, limit: usize) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        thread::Builder::new()
            .name(format!("collect-{}", name))
            .spawn(move || {
                let _ = tx.send(drain_bounded(reader, limit));
            })?;
        Ok(Self { rx })
    }

    /// Wait until `deadline` for the reader to hit EOF
    pub fn finish(self, deadline: Instant) -> CollectedStream {
        let wait = deadline.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(wait) {
            Ok(collected) => collected,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Output collector did not finish before deadline");
                CollectedStream {
                    integrity: OutputIntegrity::CollectorTimeout,
                    ..Default::default()
                }
            }
            Err(RecvTimeoutError::Disconnected) => CollectedStream {
                integrity: OutputIntegrity::ReadError,
                ..Default::default()
            },
        }
    }
}

/// Read a stream to EOF keeping at most `limit` bytes
pub fn drain_bounded<R: Read>(mut reader: R, limit: usize) -> CollectedStream {
    let mut data = Vec::with_capacity(limit.min(64 * 1024));
    let mut buf = [0u8; READ_CHUNK];
    let mut total = 0u64;
    let mut integrity = OutputIntegrity::Complete;

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                total += n as u64;
                let room = limit.saturating_sub(data.len());
                if room > 0 {
                    data.extend_from_slice(&buf[..n.min(room)]);
                }
                if n > room {
                    integrity = OutputIntegrity::TruncatedByLimit;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("Output stream read failed: {}", e);
                if integrity == OutputIntegrity::Complete {
                    integrity = OutputIntegrity::ReadError;
                }
                break;
            }
        }
    }

    CollectedStream {
        data,
        integrity,
        total_bytes: total,
    }
}

/// In-memory writer with the same truncation semantics, used by embedded tools
#[derive(Debug, Clone)]
pub struct BoundedBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl BoundedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            truncated: false,
        }
    }

    pub fn into_stream(self) -> CollectedStream {
        let total_bytes = self.data.len() as u64;
        CollectedStream {
            data: self.data,
            integrity: if self.truncated {
                OutputIntegrity::TruncatedByLimit
            } else {
                OutputIntegrity::Complete
            },
            total_bytes,
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl Write for BoundedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.limit.saturating_sub(self.data.len());
        if buf.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&buf[..buf.len().min(room)]);
        // Report everything as written; excess is discarded, not an error.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Default grace for collectors after the child has been reaped
pub const COLLECTION_GRACE: Duration = Duration::from_secs(2);
