//! Line-oriented badge scanner input
//!
//! USB badge readers typically present as keyboards and emit one payload per
//! line. The scanner only forwards text; parsing happens in the session engine.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default window in which a repeated identical payload is dropped
pub const DEFAULT_REPEAT_WINDOW: Duration = Duration::from_secs(5);

pub struct LineScanner {
    repeat_window: Duration,
}

impl LineScanner {
    pub fn new(repeat_window: Duration) -> Self {
        Self { repeat_window }
    }

    /// Read lines from `reader` and forward each non-empty payload.
    ///
    /// The task ends at end of input, on a read error, or when the receiver
    /// is dropped.
    pub fn spawn<R>(self, reader: R, tx: mpsc::Sender<String>) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            let mut last: Option<(String, Instant)> = None;

            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => {
                        info!("Scanner input closed");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Scanner read failed");
                        break;
                    }
                }

                // Readers occasionally emit stray bytes; those payloads still
                // reach the engine and fail validation there.
                let line = String::from_utf8_lossy(&buf);
                let payload = line.trim();
                if payload.is_empty() {
                    continue;
                }

                let now = Instant::now();
                if let Some((previous, at)) = &last
                    && previous == payload
                    && now.duration_since(*at) < self.repeat_window
                {
                    debug!("Dropping repeated scan");
                    continue;
                }
                last = Some((payload.to_string(), now));

                if tx.send(payload.to_string()).await.is_err() {
                    debug!("Scan receiver gone, stopping scanner");
                    break;
                }
            }
        })
    }
}

impl Default for LineScanner {
    fn default() -> Self {
        Self::new(DEFAULT_REPEAT_WINDOW)
    }
}

/// Scanner reading from the process's standard input
pub fn spawn_stdin_scanner(tx: mpsc::Sender<String>) -> JoinHandle<()> {
    LineScanner::default().spawn(tokio::io::stdin(), tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(scanner: LineScanner, input: &'static [u8]) -> Vec<String> {
        let (tx, mut rx) = mpsc::channel(16);
        scanner.spawn(input, tx).await.unwrap();

        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn forwards_trimmed_lines() {
        let lines = collect(LineScanner::new(Duration::ZERO), b"  abc \n\n\ndriver:xyz\r\n").await;
        assert_eq!(lines, vec!["abc", "driver:xyz"]);
    }

    #[tokio::test]
    async fn drops_repeats_within_window() {
        let lines = collect(
            LineScanner::new(Duration::from_secs(60)),
            b"badge-1\nbadge-1\nbadge-2\nbadge-1\n",
        )
        .await;
        assert_eq!(lines, vec!["badge-1", "badge-2", "badge-1"]);

        let lines = collect(LineScanner::new(Duration::ZERO), b"badge-1\nbadge-1\n").await;
        assert_eq!(lines, vec!["badge-1", "badge-1"]);
    }

    #[tokio::test]
    async fn keeps_reading_after_invalid_bytes() {
        let lines = collect(
            LineScanner::new(Duration::ZERO),
            b"badge-1\n\xff\xfe garbage\nbadge-2\nbadge-3",
        )
        .await;

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "badge-1");
        assert!(lines[1].ends_with(" garbage"));
        assert!(lines[1].contains('\u{FFFD}'));
        assert_eq!(&lines[2..], ["badge-2", "badge-3"]);
    }
}
