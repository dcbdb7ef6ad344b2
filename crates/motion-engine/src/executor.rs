//! Timed command/reply exchange with one controller.
//!
//! All wire traffic goes through here: stale-input flush before every
//! send, split-vs-composite transmission per the dialect, the echoed
//! command-reply discard, and the query path used by the poller. The
//! caller holds the controller's transport lock across each call, so a
//! send and its reply can never interleave with another axis's exchange
//! on the same channel.

use std::io;
use std::time::Duration;

use tracing::{debug, warn};

use motion_core::command::MessageClass;
use motion_core::dialect::DialectTable;
use motion_core::transport::{RecvOutcome, Transport};

use crate::builder::Transaction;

/// Timeouts and reply bound for one controller instance.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolParams {
    pub send_timeout: Duration,
    pub recv_timeout: Duration,
    pub max_reply_len: usize,
}

/// How one exchange ended. Timeouts and malformed replies are ordinary
/// outcomes — the communication-health machine decides what they mean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Exchange completed; the reply text, or `None` when the dialect
    /// expects no reply for this message.
    Success(Option<String>),
    /// The receive ceiling expired with nothing received.
    Timeout,
    /// Bytes arrived without the expected framing.
    Malformed(Vec<u8>),
}

impl ExchangeOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, ExchangeOutcome::Success(_))
    }
}

/// Discard anything left over from a prior exchange.
///
/// Stale bytes here mean the previous reply was never fully consumed
/// (or the controller chattered unprompted); worth a warning but never
/// fatal.
async fn flush_stale(transport: &mut dyn Transport, dialect: &DialectTable) {
    let stale = transport.flush_input().await;
    if stale > 0 {
        warn!(
            dialect = dialect.name,
            stale, "flushed stale bytes before send"
        );
    }
}

async fn send_piece(
    transport: &mut dyn Transport,
    dialect: &DialectTable,
    params: &ProtocolParams,
    piece: &str,
) -> io::Result<()> {
    let mut wire = String::with_capacity(piece.len() + dialect.send_terminator.len());
    wire.push_str(piece);
    wire.push_str(dialect.send_terminator);
    debug!(dialect = dialect.name, message = piece, "send");
    transport.send(wire.as_bytes(), params.send_timeout).await
}

async fn recv_reply(
    transport: &mut dyn Transport,
    params: &ProtocolParams,
) -> io::Result<ExchangeOutcome> {
    match transport
        .recv(params.max_reply_len, params.recv_timeout)
        .await?
    {
        RecvOutcome::Reply(bytes) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            debug!(reply = %text, "recv");
            Ok(ExchangeOutcome::Success(Some(text)))
        }
        RecvOutcome::Timeout => Ok(ExchangeOutcome::Timeout),
        RecvOutcome::Malformed(bytes) => Ok(ExchangeOutcome::Malformed(bytes)),
    }
}

/// Send an assembled transaction.
///
/// Split-transmission dialects get each delimited part as its own wire
/// message with intermediate replies discarded; composite dialects get
/// the whole message at once. Dialects that echo a reply to
/// motion/velocity/stop commands have that echo read and discarded
/// here, inside the same lock scope.
pub async fn send_transaction(
    transport: &mut dyn Transport,
    dialect: &DialectTable,
    params: &ProtocolParams,
    txn: &Transaction,
) -> io::Result<ExchangeOutcome> {
    if txn.is_noop() {
        return Ok(ExchangeOutcome::Success(None));
    }

    flush_stale(transport, dialect).await;

    if dialect.split_transmission {
        let pieces: Vec<&str> = txn.message.split(dialect.delimiter).collect();
        let last = pieces.len() - 1;
        for (i, piece) in pieces.into_iter().enumerate() {
            if piece.is_empty() {
                continue;
            }
            send_piece(transport, dialect, params, piece).await?;
            // Intermediate replies are discarded; a silent controller
            // mid-transaction is tolerated.
            if i < last {
                let _ = recv_reply(transport, params).await?;
            }
        }
    } else {
        send_piece(transport, dialect, params, &txn.message).await?;
    }

    let expects_echo = dialect.cmnd_response
        && matches!(
            txn.class,
            MessageClass::Motion | MessageClass::Velocity | MessageClass::MoveTerminate
        );
    if expects_echo {
        // The echo itself is the health signal for these dialects.
        return recv_reply(transport, params).await;
    }

    Ok(ExchangeOutcome::Success(None))
}

/// Send a bare message with no reply expected (stop-all at bring-up,
/// post-move controller directives).
pub async fn send_message(
    transport: &mut dyn Transport,
    dialect: &DialectTable,
    params: &ProtocolParams,
    message: &str,
) -> io::Result<()> {
    flush_stale(transport, dialect).await;
    send_piece(transport, dialect, params, message).await
}

/// One query: send a message and read its framed reply atomically.
pub async fn query(
    transport: &mut dyn Transport,
    dialect: &DialectTable,
    params: &ProtocolParams,
    message: &str,
) -> io::Result<ExchangeOutcome> {
    flush_stale(transport, dialect).await;
    send_piece(transport, dialect, params, message).await?;
    recv_reply(transport, params).await
}

/// Pipelined queries: send every message first, then read the replies
/// in issue order. Reply `i` belongs to message `i`; the controller
/// answers in order on a half-duplex channel.
pub async fn query_pipelined(
    transport: &mut dyn Transport,
    dialect: &DialectTable,
    params: &ProtocolParams,
    messages: &[String],
) -> io::Result<Vec<ExchangeOutcome>> {
    flush_stale(transport, dialect).await;
    for message in messages {
        send_piece(transport, dialect, params, message).await?;
    }
    let mut outcomes = Vec::with_capacity(messages.len());
    for _ in messages {
        outcomes.push(recv_reply(transport, params).await?);
    }
    Ok(outcomes)
}
