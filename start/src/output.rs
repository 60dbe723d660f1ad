//! Output multiplexing.
//!
//! Every process instance, and the supervisor itself, writes through one
//! [`OutputMux`]. Lines are prefixed with a timestamp and the padded instance
//! name and are written whole under a single lock, so concurrent producers
//! interleave by line and never tear one.

use chrono::Local;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::warn;

/// Name used for the supervisor's own status lines.
pub const SYSTEM_NAME: &str = "mango";

const COLORS: [u8; 12] = [36, 33, 32, 35, 31, 34, 96, 93, 92, 95, 91, 94];

/// Serialization point for all output.
pub struct OutputMux {
    sink: Mutex<Box<dyn Write + Send>>,
    padding: usize,
    colors: bool,
}

impl OutputMux {
    /// Create a multiplexer writing to `sink`, without colours.
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Mutex::new(Box::new(sink)),
            padding: SYSTEM_NAME.len(),
            colors: false,
        }
    }

    /// Create a multiplexer on stdout, coloured when stdout is a terminal.
    pub fn stdout() -> Self {
        use std::io::IsTerminal;
        let colors = io::stdout().is_terminal();
        Self::new(io::stdout()).with_colors(colors)
    }

    /// Pad names to at least `width` columns.
    pub fn with_padding(mut self, width: usize) -> Self {
        self.padding = width.max(SYSTEM_NAME.len());
        self
    }

    /// Enable or disable ANSI colours.
    pub fn with_colors(mut self, colors: bool) -> Self {
        self.colors = colors;
        self
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    /// Write one line attributed to `name`.
    ///
    /// `index` selects the colour; `None` marks a supervisor line.
    pub fn write_line(&self, name: &str, index: Option<usize>, line: &str) {
        let timestamp = Local::now().format("%H:%M:%S");
        let formatted = if self.colors {
            let color = index.map(|i| COLORS[i % COLORS.len()]).unwrap_or(1);
            format!(
                "\x1b[{}m{} {:<width$} |\x1b[0m {}\n",
                color,
                timestamp,
                name,
                line,
                width = self.padding
            )
        } else {
            format!(
                "{} {:<width$} | {}\n",
                timestamp,
                name,
                line,
                width = self.padding
            )
        };

        let mut sink = self.sink.lock();
        if let Err(e) = sink.write_all(formatted.as_bytes()).and_then(|_| sink.flush()) {
            warn!(error = %e, "Failed to write output line");
        }
    }

    /// Write a supervisor status line.
    pub fn system(&self, message: &str) {
        self.write_line(SYSTEM_NAME, None, message);
    }

    /// Write a supervisor error line.
    pub fn error(&self, message: &str) {
        self.write_line(SYSTEM_NAME, None, &format!("ERROR: {}", message));
    }

    /// Drain `reader` line by line into the multiplexer.
    ///
    /// Every emitted line is also handed to `on_line`, which must not block.
    /// A final line without a newline is emitted at end of input. Bytes that
    /// are not UTF-8 are replaced rather than ending the pump.
    pub async fn pump<R>(
        &self,
        name: &str,
        index: usize,
        reader: R,
        mut on_line: impl FnMut(&str),
    ) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                return Ok(());
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            self.write_line(name, Some(index), line);
            on_line(line);
        }
    }
}

/// In-memory sink, handy for capturing output.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }

    /// Written lines, without trailing newlines.
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for MemorySink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
