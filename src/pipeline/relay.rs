//! Byte relay from the frame source's stdout into the encoder's stdin.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const RELAY_BUFFER: usize = 256 * 1024;

/// How the relay ended
#[derive(Debug)]
pub struct RelayOutcome<W> {
    /// Writer handed back open, so the caller decides when end-of-stream is signalled
    pub writer: Option<W>,
    pub bytes: u64,
    /// The reading side went away before the source finished
    pub closed_early: bool,
    pub error: Option<std::io::Error>,
}

/// Copy until the reader hits EOF or the writer stops accepting data.
/// `counter` tracks relayed bytes so a cancelled job can report them.
pub async fn relay<R, W>(mut reader: R, mut writer: W, counter: Arc<AtomicU64>) -> RelayOutcome<W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER];
    let mut bytes = 0u64;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                return RelayOutcome {
                    writer: Some(writer),
                    bytes,
                    closed_early: false,
                    error: Some(e),
                }
            }
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            // Dropping the reader on return lets the source see EPIPE instead of blocking
            if e.kind() == ErrorKind::BrokenPipe {
                debug!("Encoder closed its input after {} bytes", bytes);
                return RelayOutcome {
                    writer: None,
                    bytes,
                    closed_early: true,
                    error: None,
                };
            }
            return RelayOutcome {
                writer: None,
                bytes,
                closed_early: false,
                error: Some(e),
            };
        }

        bytes += n as u64;
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    if let Err(e) = writer.flush().await {
        let closed_early = e.kind() == ErrorKind::BrokenPipe;
        return RelayOutcome {
            writer: None,
            bytes,
            closed_early,
            error: (!closed_early).then_some(e),
        };
    }

    debug!("Frame stream ended after {} bytes", bytes);
    RelayOutcome {
        writer: Some(writer),
        bytes,
        closed_early: false,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_relays_everything_and_keeps_writer_open() {
        let data = vec![7u8; RELAY_BUFFER * 2 + 17];
        let counter = Arc::new(AtomicU64::new(0));
        let outcome = relay(&data[..], Vec::new(), counter.clone()).await;

        assert_eq!(outcome.bytes, data.len() as u64);
        assert_eq!(counter.load(Ordering::Relaxed), data.len() as u64);
        assert!(!outcome.closed_early);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.writer.unwrap(), data);
    }

    #[tokio::test]
    async fn test_reader_side_closing_is_an_early_stop() {
        let (writer, reader) = tokio::io::duplex(64);
        drop(reader);

        let counter = Arc::new(AtomicU64::new(0));
        let outcome = relay(&b"frames that nobody reads"[..], writer, counter).await;
        assert!(outcome.closed_early);
        assert!(outcome.writer.is_none());
        assert_eq!(outcome.bytes, 0);
    }
}
