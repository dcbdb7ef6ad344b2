//! Raw wire abstractions for controller channels.
//!
//! A controller channel is anything that moves bytes both ways: a real
//! serial line ([`open_serial_async`], behind the `serial` feature), a
//! GPIB-to-serial bridge, or a `tokio::io::duplex` pair in tests. The
//! transports in [`crate::transport`] layer framing and timeouts on top
//! of these.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// Trait alias for async controller-channel I/O.
///
/// Implemented by `tokio_serial::SerialStream`, `tokio::io::DuplexStream`
/// and any mock with the async I/O traits.
pub trait WireIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> WireIO for T {}

/// Type-erased boxed controller channel.
pub type DynWire = Box<dyn WireIO>;

/// Open a serial port with the standard controller settings (8N1, no
/// flow control), off the async runtime via `spawn_blocking`.
///
/// `label` names the controller in error context.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    path: &str,
    baud_rate: u32,
    label: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let path = path.to_string();
    let label = label.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!("failed to open {label} serial port {path}"))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

/// Read and discard whatever is already buffered on the channel.
///
/// Used before a transaction to clear stale bytes left by a prior
/// exchange (a half-read reply, noise after a controller reset). Returns
/// the number of bytes discarded; the ceiling bounds the whole drain.
pub async fn drain_input<R: AsyncRead + Unpin>(io: &mut R, ceiling: Duration) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + ceiling;
    let mut total = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, io.read(&mut discard)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => total += n,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn drain_discards_stale_bytes() {
        let (mut host, mut device) = tokio::io::duplex(64);
        host.write_all(b"stale junk\r").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let n = drain_input(&mut device, Duration::from_millis(20)).await;
        assert_eq!(n, 11);

        // A second drain finds nothing.
        let n = drain_input(&mut device, Duration::from_millis(10)).await;
        assert_eq!(n, 0);
    }
}
