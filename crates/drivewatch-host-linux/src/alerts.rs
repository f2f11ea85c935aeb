//! Console alert renderer

use drivewatch_api::AlertLevel;
use drivewatch_host_api::Alerter;
use std::io::Write;
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Renders alerts as single lines on a terminal (stdout by default)
pub struct ConsoleAlerter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleAlerter {
    pub fn new() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl Default for ConsoleAlerter {
    fn default() -> Self {
        Self::new()
    }
}

fn label(level: AlertLevel) -> &'static str {
    match level {
        AlertLevel::Info => "INFO",
        AlertLevel::Warning => "WARNING",
        AlertLevel::Critical => "CRITICAL",
    }
}

impl Alerter for ConsoleAlerter {
    fn notify(&self, level: AlertLevel, message: &str) {
        match level {
            AlertLevel::Info => info!(alert = message, "Alert shown"),
            AlertLevel::Warning => warn!(alert = message, "Alert shown"),
            AlertLevel::Critical => error!(alert = message, "Alert shown"),
        }

        let Ok(mut out) = self.out.lock() else {
            return;
        };
        if let Err(e) = writeln!(out, "[{}] {}", label(level), message).and_then(|_| out.flush()) {
            warn!(error = %e, "Failed to render alert");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn renders_level_and_message() {
        let buf = SharedBuf::default();
        let alerter = ConsoleAlerter::with_writer(Box::new(buf.clone()));

        alerter.notify(AlertLevel::Info, "Welcome, Ana Ruiz. Session started.");
        alerter.notify(AlertLevel::Critical, "Driving limit exceeded");

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            text,
            "[INFO] Welcome, Ana Ruiz. Session started.\n[CRITICAL] Driving limit exceeded\n"
        );
    }
}
