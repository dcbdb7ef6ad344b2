//! Scripted motion-controller emulator.
//!
//! Speaks the MM4000-flavored aggregate dialect over one half of a
//! `tokio::io::duplex` pair, far enough to bring a controller up and
//! drive moves end to end: identity and per-axis probe queries,
//! absolute/relative moves with simulated stepwise motion, aggregate
//! `MS`/`TP` polls and stop.
//!
//! Failure modes are switchable at runtime through the handle so tests
//! can inject a communication glitch or a frozen (stalled) axis
//! mid-scenario.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tracing::debug;

/// Shape of the emulated controller.
#[derive(Debug, Clone)]
pub struct MockProfile {
    pub axes: usize,
    /// Identity string answered to `VE`.
    pub ident: String,
    /// Engineering units per step, answered to the `TU` probe.
    pub resolution: f64,
    /// Controller units of travel per `TP` query while moving.
    pub units_per_poll: f64,
    /// Report done on the first status query after a move command even
    /// though the axis is still travelling ("jerk complete").
    pub premature_done: bool,
}

impl Default for MockProfile {
    fn default() -> Self {
        Self {
            axes: 2,
            ident: "VE MM4000 2.0".to_string(),
            resolution: 0.001,
            units_per_poll: 0.5,
            premature_done: false,
        }
    }
}

/// Test-side controls and observability for a running emulator.
#[derive(Clone)]
pub struct MockHandle {
    /// Every command line the emulator received, in order.
    pub log: Arc<Mutex<Vec<String>>>,
    drop_replies: Arc<AtomicUsize>,
    frozen: Arc<AtomicBool>,
}

impl MockHandle {
    /// Swallow the next `n` poll queries (the engine sees timeouts).
    pub fn drop_next_replies(&self, n: usize) {
        self.drop_replies.store(n, Ordering::SeqCst);
    }

    /// Freeze all axes: moves are accepted but position never changes.
    pub fn freeze(&self, frozen: bool) {
        self.frozen.store(frozen, Ordering::SeqCst);
    }

    /// Commands received so far.
    pub fn received(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// True if any received command line contains `needle`.
    pub fn saw(&self, needle: &str) -> bool {
        self.received().iter().any(|c| c.contains(needle))
    }
}

struct AxisSim {
    position: f64,
    target: f64,
    /// Set by a move command, cleared after the first status reply —
    /// drives the premature-done behavior.
    fresh_move: bool,
}

/// Spawn the emulator; the returned stream is the engine's side of the
/// wire.
pub fn spawn(profile: MockProfile) -> (DuplexStream, MockHandle) {
    let (engine_side, mock_side) = tokio::io::duplex(1024);
    let handle = MockHandle {
        log: Arc::new(Mutex::new(Vec::new())),
        drop_replies: Arc::new(AtomicUsize::new(0)),
        frozen: Arc::new(AtomicBool::new(false)),
    };

    let task_handle = handle.clone();
    tokio::spawn(async move {
        run_emulator(profile, mock_side, task_handle).await;
    });

    (engine_side, handle)
}

async fn run_emulator(profile: MockProfile, wire: DuplexStream, handle: MockHandle) {
    let mut axes: Vec<AxisSim> = (0..profile.axes)
        .map(|_| AxisSim {
            position: 0.0,
            target: 0.0,
            fresh_move: false,
        })
        .collect();

    let (read_half, mut write_half) = tokio::io::split(wire);
    let mut reader = BufReader::new(read_half);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\r', &mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        let message = String::from_utf8_lossy(&line).into_owned();
        if message.is_empty() {
            continue;
        }
        if let Ok(mut log) = handle.log.lock() {
            log.push(message.clone());
        }
        debug!(command = %message, "mock received");

        let mut reply: Option<String> = None;
        // Composite transactions carry several commands in one message.
        for piece in message.split(';') {
            if let Some(r) = execute(piece, &profile, &mut axes, &handle) {
                reply = Some(r);
            }
        }

        if let Some(reply) = reply {
            if handle.drop_replies.load(Ordering::SeqCst) > 0 {
                handle.drop_replies.fetch_sub(1, Ordering::SeqCst);
                debug!("mock swallowing reply");
                continue;
            }
            let framed = format!("{reply}\r");
            if write_half.write_all(framed.as_bytes()).await.is_err() {
                break;
            }
        }
    }
}

/// Run one command; queries return the reply text.
fn execute(
    piece: &str,
    profile: &MockProfile,
    axes: &mut [AxisSim],
    handle: &MockHandle,
) -> Option<String> {
    let piece = piece.trim();
    match piece {
        "" => return None,
        "VE" => return Some(profile.ident.clone()),
        "TP" => {
            if !handle.frozen.load(Ordering::SeqCst) {
                for axis in axes.iter_mut() {
                    let delta = axis.target - axis.position;
                    let step = profile.units_per_poll.min(delta.abs());
                    axis.position += step * delta.signum();
                    if delta.abs() <= profile.units_per_poll {
                        axis.position = axis.target;
                    }
                }
            }
            let list: Vec<String> = axes
                .iter()
                .enumerate()
                .map(|(i, a)| format!("{}TP{:.4}", i + 1, a.position))
                .collect();
            return Some(list.join(","));
        }
        "MS" => {
            let list: Vec<String> = axes
                .iter_mut()
                .enumerate()
                .map(|(i, a)| {
                    let mut byte = 0u8;
                    let truly_moving = a.position != a.target;
                    let moving = if profile.premature_done && a.fresh_move {
                        false
                    } else {
                        truly_moving
                    };
                    a.fresh_move = false;
                    if moving {
                        byte |= 0x01;
                    }
                    if a.target >= a.position {
                        byte |= 0x04;
                    }
                    format!("{}MS{}", i + 1, byte as char)
                })
                .collect();
            return Some(list.join(","));
        }
        "ST" => {
            for axis in axes.iter_mut() {
                axis.target = axis.position;
            }
            return None;
        }
        _ => {}
    }

    // Per-axis commands: digits, two-letter mnemonic, optional value.
    let digits: String = piece.chars().take_while(|c| c.is_ascii_digit()).collect();
    let index = digits.parse::<usize>().ok()?.checked_sub(1)?;
    let axis = axes.get_mut(index)?;
    let rest = &piece[digits.len()..];
    let mnemonic: String = rest.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let value: f64 = rest[mnemonic.len()..].parse().unwrap_or(0.0);

    match mnemonic.as_str() {
        "PA" => {
            axis.target = value;
            axis.fresh_move = true;
            None
        }
        "PR" => {
            axis.target = axis.position + value;
            axis.fresh_move = true;
            None
        }
        "OR" => {
            axis.target = 0.0;
            axis.fresh_move = true;
            None
        }
        "ST" => {
            axis.target = axis.position;
            None
        }
        // Probe queries answer `{axis}{mnemonic}{value}` style.
        "TC" => Some(format!("{}TC1", index + 1)),
        "TU" => Some(format!("{}TU{}", index + 1, profile.resolution)),
        "XH" => Some(format!("{}XH0.0", index + 1)),
        "TL" => Some(format!("{}TL-100.0", index + 1)),
        "TR" => Some(format!("{}TR100.0", index + 1)),
        // Setup commands are accepted silently.
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn exchange(wire: &mut DuplexStream, command: &str) -> String {
        wire.write_all(format!("{command}\r").as_bytes())
            .await
            .unwrap();
        let mut buf = vec![0u8; 256];
        let n = wire.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n])
            .trim_end_matches('\r')
            .to_string()
    }

    #[tokio::test]
    async fn answers_identity_and_probes() {
        let (mut wire, _handle) = spawn(MockProfile::default());
        assert_eq!(exchange(&mut wire, "VE").await, "VE MM4000 2.0");
        assert_eq!(exchange(&mut wire, "1TC").await, "1TC1");
        assert_eq!(exchange(&mut wire, "1TU").await, "1TU0.001");
    }

    #[tokio::test]
    async fn simulates_stepwise_motion() {
        let (mut wire, _handle) = spawn(MockProfile {
            units_per_poll: 1.0,
            ..MockProfile::default()
        });

        wire.write_all(b"1PA2.0\r").await.unwrap();
        assert_eq!(
            exchange(&mut wire, "TP").await,
            "1TP1.0000,2TP0.0000"
        );
        assert_eq!(
            exchange(&mut wire, "TP").await,
            "1TP2.0000,2TP0.0000"
        );
    }

    #[tokio::test]
    async fn frozen_axes_never_move() {
        let (mut wire, handle) = spawn(MockProfile::default());
        handle.freeze(true);

        wire.write_all(b"1PA5.0\r").await.unwrap();
        assert_eq!(
            exchange(&mut wire, "TP").await,
            "1TP0.0000,2TP0.0000"
        );
        assert!(handle.saw("1PA5.0"));
    }
}
