use std::io::{self, Write};

use crossbeam_channel::{Receiver, Sender};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

use crate::error::{Result, SyncError};

/// Forwards log output to the host's debug console one complete line at a time.
///
/// A partial line is held back until its newline arrives or the writer is dropped.
pub struct ConsoleWriter {
    console: Sender<String>,
    partial: String,
}

impl ConsoleWriter {
    pub fn new() -> (Self, Receiver<String>) {
        let (console, lines) = crossbeam_channel::unbounded();
        (
            Self {
                console,
                partial: String::new(),
            },
            lines,
        )
    }

    fn forward(&self, line: String) {
        if let Err(e) = self.console.send(line) {
            eprintln!("{}", e.into_inner());
        }
    }
}

impl Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.partial.push_str(&String::from_utf8_lossy(buf));
        while let Some(end) = self.partial.find('\n') {
            let line = self.partial.drain(..=end).collect::<String>();
            self.forward(line.trim_end_matches(['\r', '\n']).to_string());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.forward(line);
        }
        Ok(())
    }
}

impl Drop for ConsoleWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for ConsoleWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        Self {
            console: self.console.clone(),
            partial: String::new(),
        }
    }
}

/// Installs the global subscriber and returns the console line stream.
///
/// `RUST_LOG` wins over `default_filter`.
pub fn init(default_filter: &str) -> Result<Receiver<String>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| SyncError::Logging(e.to_string()))?;
    let (writer, rx) = ConsoleWriter::new();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| SyncError::Logging(e.to_string()))?;
    Ok(rx)
}
