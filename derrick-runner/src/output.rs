//! Terminal output handle
//!
//! Collaborators, decorators and the log aggregator all write
//! user-facing lines through a cloneable handle so output can be shared
//! across tasks and captured in tests.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Shared writer for user-visible output
#[derive(Clone)]
pub struct Output {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Output {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Writes one line, flushing so interactive prompts appear promptly
    pub fn write_line(&self, line: &str) {
        let mut writer = self.inner.lock().unwrap();
        let _ = writeln!(writer, "{}", line);
        let _ = writer.flush();
    }

    /// Writes raw bytes without a trailing newline (terminal bell etc.)
    pub fn write_raw(&self, bytes: &[u8]) {
        let mut writer = self.inner.lock().unwrap();
        let _ = writer.write_all(bytes);
        let _ = writer.flush();
    }
}

#[cfg(test)]
pub(crate) mod capture {
    use super::*;

    /// In-memory writer handle for asserting on terminal output
    #[derive(Clone, Default)]
    pub struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Returns an output plus the buffer it writes into
    pub fn captured_output() -> (Output, Captured) {
        let captured = Captured::default();
        (Output::new(captured.clone()), captured)
    }
}
