//! Framed, timeout-bounded transport over a raw wire.
//!
//! Two bindings cover the supported controller families:
//! [`LineTransport`] for terminator-byte framing (CR/LF-style replies)
//! and [`PromptTransport`] for controllers that end every reply with a
//! fixed prompt character instead of a line terminator.
//!
//! Every receive distinguishes three outcomes — a complete reply, a
//! timeout with nothing received, and a malformed reply (bytes without
//! the expected framing). Ceiling expiry is a first-class outcome here,
//! not an error: the communication-health machine upstream decides what
//! a timeout means.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::serial::{drain_input, DynWire};

/// Ceiling for the pre-transaction stale-byte drain.
const FLUSH_CEILING: Duration = Duration::from_millis(10);

/// Reply framing used by a controller family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Replies end with this terminator byte (usually CR).
    Line(u8),
    /// Replies end with a fixed prompt character.
    Prompt(u8),
}

/// Result of a bounded receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvOutcome {
    /// A complete reply, framing stripped.
    Reply(Vec<u8>),
    /// The ceiling expired with no bytes at all.
    Timeout,
    /// Bytes arrived but the framing never did (partial reply, overlong
    /// reply, or wrong terminator).
    Malformed(Vec<u8>),
}

/// Byte channel to one controller, with bounded send and receive.
///
/// A transport is exclusive to one exchange at a time; callers hold the
/// owning controller's lock across a send+receive pair.
#[async_trait]
pub trait Transport: Send {
    /// Write `bytes`, blocking at most `timeout`.
    async fn send(&mut self, bytes: &[u8], timeout: Duration) -> io::Result<()>;

    /// Read one framed reply of at most `max_len` bytes, blocking at
    /// most `timeout`.
    async fn recv(&mut self, max_len: usize, timeout: Duration) -> io::Result<RecvOutcome>;

    /// Discard already-buffered input; returns the byte count discarded.
    async fn flush_input(&mut self) -> usize;
}

/// Build the transport binding matching a dialect's framing.
pub fn for_framing(framing: Framing, wire: DynWire) -> Box<dyn Transport> {
    match framing {
        Framing::Line(t) => Box::new(LineTransport::new(wire, t)),
        Framing::Prompt(p) => Box::new(PromptTransport::new(wire, p)),
    }
}

async fn write_bounded<W: AsyncWriteExt + Unpin>(
    io: &mut W,
    bytes: &[u8],
    timeout: Duration,
) -> io::Result<()> {
    tokio::time::timeout(timeout, async {
        io.write_all(bytes).await?;
        io.flush().await
    })
    .await
    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "send timeout"))?
}

// =============================================================================
// LineTransport
// =============================================================================

/// Terminator-byte framing over a buffered reader.
///
/// The `BufReader` makes `read_until` efficient for the short
/// line-replies these controllers produce.
pub struct LineTransport {
    io: BufReader<DynWire>,
    terminator: u8,
}

impl LineTransport {
    pub fn new(wire: DynWire, terminator: u8) -> Self {
        Self {
            io: BufReader::new(wire),
            terminator,
        }
    }
}

#[async_trait]
impl Transport for LineTransport {
    async fn send(&mut self, bytes: &[u8], timeout: Duration) -> io::Result<()> {
        write_bounded(self.io.get_mut(), bytes, timeout).await
    }

    async fn recv(&mut self, max_len: usize, timeout: Duration) -> io::Result<RecvOutcome> {
        let mut buf = Vec::new();
        match tokio::time::timeout(timeout, self.io.read_until(self.terminator, &mut buf)).await
        {
            Ok(Ok(0)) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "controller channel closed",
            )),
            Ok(Ok(_)) => {
                if buf.last() == Some(&self.terminator) {
                    buf.pop();
                    if buf.len() > max_len {
                        Ok(RecvOutcome::Malformed(buf))
                    } else {
                        Ok(RecvOutcome::Reply(buf))
                    }
                } else {
                    // EOF before the terminator.
                    Ok(RecvOutcome::Malformed(buf))
                }
            }
            Ok(Err(e)) => Err(e),
            Err(_) if buf.is_empty() => Ok(RecvOutcome::Timeout),
            Err(_) => Ok(RecvOutcome::Malformed(buf)),
        }
    }

    async fn flush_input(&mut self) -> usize {
        // Bytes sitting in the BufReader count as stale input too.
        let buffered = self.io.buffer().len();
        self.io.consume(buffered);
        buffered + drain_input(self.io.get_mut(), FLUSH_CEILING).await
    }
}

// =============================================================================
// PromptTransport
// =============================================================================

/// Prompt-character framing.
///
/// The controller ends each reply with a prompt byte and stays silent
/// until the next command, so anything after the prompt within one
/// receive is stale and gets dropped.
pub struct PromptTransport {
    io: DynWire,
    prompt: u8,
}

impl PromptTransport {
    pub fn new(wire: DynWire, prompt: u8) -> Self {
        Self { io: wire, prompt }
    }

    fn strip(reply: &mut Vec<u8>) {
        while matches!(reply.last(), Some(b'\r') | Some(b'\n')) {
            reply.pop();
        }
    }
}

#[async_trait]
impl Transport for PromptTransport {
    async fn send(&mut self, bytes: &[u8], timeout: Duration) -> io::Result<()> {
        write_bounded(&mut self.io, bytes, timeout).await
    }

    async fn recv(&mut self, max_len: usize, timeout: Duration) -> io::Result<RecvOutcome> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut buf: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 64];

        loop {
            if let Some(at) = buf.iter().position(|&b| b == self.prompt) {
                let trailing = buf.len() - at - 1;
                if trailing > 0 {
                    debug!(trailing, "dropping bytes after prompt");
                }
                buf.truncate(at);
                Self::strip(&mut buf);
                return if buf.len() > max_len {
                    Ok(RecvOutcome::Malformed(buf))
                } else {
                    Ok(RecvOutcome::Reply(buf))
                };
            }
            if buf.len() > max_len {
                return Ok(RecvOutcome::Malformed(buf));
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return if buf.is_empty() {
                    Ok(RecvOutcome::Timeout)
                } else {
                    Ok(RecvOutcome::Malformed(buf))
                };
            }
            match tokio::time::timeout(remaining, self.io.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "controller channel closed",
                    ))
                }
                Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return if buf.is_empty() {
                        Ok(RecvOutcome::Timeout)
                    } else {
                        Ok(RecvOutcome::Malformed(buf))
                    }
                }
            }
        }
    }

    async fn flush_input(&mut self) -> usize {
        drain_input(&mut self.io, FLUSH_CEILING).await
    }
}
