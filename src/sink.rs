//! Where rendered lines end up: the [`Sink`] seam, the default [`Output`]
//! and an in-memory sink for tests.

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::rotation::RotatingFile;
use crate::severity::{Severities, Severity};

/// Destination for rendered lines.
///
/// The backend thread owns the sink and calls it for every entry it decodes,
/// in queue order. Implementations decide what happens with the text: write
/// it to disk, to the console, to a test buffer, or elsewhere.
///
/// # Usage
///
/// ```
/// use async_binary_logger::{Severity, Sink};
///
/// // Counts lines per severity, drops the text.
/// #[derive(Default)]
/// struct Counter([u64; 8]);
///
/// impl Sink for Counter {
///     fn write(&mut self, severity: Severity, _line: &[u8]) -> bool {
///         self.0[severity.bits() as usize] += 1;
///         true
///     }
///
///     fn raw_write(&mut self, _severity: Severity, _msg: &str) {}
///
///     fn flush(&mut self) {}
/// }
/// ```
pub trait Sink: Send + 'static {
    /// Writes one rendered line (newline included). Returns false if the
    /// line could not be written.
    fn write(&mut self, severity: Severity, line: &[u8]) -> bool;

    /// Writes a message that did not come from an entry, such as a report
    /// about an entry that failed to decode. No trailing newline.
    fn raw_write(&mut self, severity: Severity, msg: &str);

    /// Called when the queue runs dry and before the backend exits.
    fn flush(&mut self);
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn write(&mut self, severity: Severity, line: &[u8]) -> bool {
        (**self).write(severity, line)
    }

    fn raw_write(&mut self, severity: Severity, msg: &str) {
        (**self).raw_write(severity, msg)
    }

    fn flush(&mut self) {
        (**self).flush()
    }
}

/// Default sink: an optional rotating file plus the console.
///
/// A line goes to the file if its severity passes the file threshold, and to
/// stderr if it passes the stderr threshold, otherwise to stdout if it passes
/// the stdout threshold. The thresholds are shared with the
/// [`crate::Logger`] that feeds this sink, so runtime changes apply to both.
pub struct Output {
    file: Option<RotatingFile>,
    severities: Arc<Severities>,
    stderr: Box<dyn Write + Send>,
    stdout: Box<dyn Write + Send>,
}

impl Output {
    /// Output to `file`, if any, and to the process's stderr and stdout.
    pub fn new(file: Option<RotatingFile>, severities: Arc<Severities>) -> Self {
        Self::with_console(file, severities, io::stderr(), io::stdout())
    }

    /// Like [`Output::new`], with the console streams replaced.
    pub fn with_console(
        file: Option<RotatingFile>,
        severities: Arc<Severities>,
        stderr: impl Write + Send + 'static,
        stdout: impl Write + Send + 'static,
    ) -> Self {
        Self {
            file,
            severities,
            stderr: Box::new(stderr),
            stdout: Box::new(stdout),
        }
    }

    // stderr wins; a line never goes to both streams.
    fn console(&mut self, severity: Severity, bytes: &[u8]) -> io::Result<()> {
        if severity.passes(self.severities.stderr.load()) {
            self.stderr.write_all(bytes)
        } else if severity.passes(self.severities.stdout.load()) {
            self.stdout.write_all(bytes)
        } else {
            Ok(())
        }
    }
}

impl Sink for Output {
    fn write(&mut self, severity: Severity, line: &[u8]) -> bool {
        let mut ok = true;
        if let Some(file) = self.file.as_mut() {
            if severity.passes(self.severities.file.load()) {
                if let Err(err) = file.write(line) {
                    tracing::warn!(%err, path = %file.path().display(), "log file write failed");
                    ok = false;
                }
            }
        }
        if let Err(err) = self.console(severity, line) {
            tracing::warn!(%err, "console write failed");
            ok = false;
        }
        ok
    }

    fn raw_write(&mut self, severity: Severity, msg: &str) {
        let mut line = String::with_capacity(msg.len() + 1);
        line.push_str(msg);
        line.push('\n');
        self.write(severity, line.as_bytes());
    }

    fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            if let Err(err) = file.flush() {
                tracing::warn!(%err, "log file flush failed");
            }
        }
        let _ = self.stdout.flush();
        let _ = self.stderr.flush();
    }
}

/// In-memory sink that keeps every line. Clones share the same buffer, so a
/// test can hand one clone to the logger and inspect another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<(Severity, String)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the lines written so far, trailing newlines removed.
    pub fn lines(&self) -> Vec<(Severity, String)> {
        self.lines.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Applies `f` to the buffer without copying it.
    pub fn with_lines<R>(&self, f: impl FnOnce(&[(Severity, String)]) -> R) -> R {
        f(&self.lines.lock())
    }
}

impl Sink for MemorySink {
    fn write(&mut self, severity: Severity, line: &[u8]) -> bool {
        let text = String::from_utf8_lossy(line);
        let text = text.strip_suffix('\n').unwrap_or(&text[..]);
        self.lines.lock().push((severity, text.to_string()));
        true
    }

    fn raw_write(&mut self, severity: Severity, msg: &str) {
        self.lines.lock().push((severity, msg.to_string()));
    }

    fn flush(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileConfig;
    use std::fs;

    #[test]
    fn test_output_file_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileConfig {
            out_folder: dir.path().to_path_buf(),
            ..FileConfig::default()
        };
        let file = RotatingFile::open(&config).unwrap();
        let path = file.path();
        let severities = Arc::new(Severities::new(Severity::Warning, Severity::Off, Severity::Off));
        let mut output = Output::new(Some(file), severities.clone());

        assert!(output.write(Severity::Notice, b"skipped\n"));
        assert!(output.write(Severity::Error, b"kept\n"));
        output.raw_write(Severity::Critical, "raw");
        severities.file.store(Severity::Debug);
        assert!(output.write(Severity::Debug, b"now kept\n"));
        output.flush();

        assert_eq!(fs::read_to_string(path).unwrap(), "kept\nraw\nnow kept\n");
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    #[test]
    fn test_console_streams_are_exclusive() {
        let severities = Arc::new(Severities::new(Severity::Off, Severity::Notice, Severity::Error));
        let (stderr, stdout) = (Captured::default(), Captured::default());
        let mut output = Output::with_console(None, severities.clone(), stderr.clone(), stdout.clone());

        assert!(output.write(Severity::Critical, b"both pass\n"));
        assert!(output.write(Severity::Warning, b"stdout only\n"));
        assert!(output.write(Severity::Debug, b"neither\n"));
        severities.stderr.store(Severity::Off);
        assert!(output.write(Severity::Error, b"stderr off\n"));
        output.flush();

        assert_eq!(stderr.text(), "both pass\n");
        assert_eq!(stdout.text(), "stdout only\nstderr off\n");
    }

    #[test]
    fn test_memory_sink_shares_buffer() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        assert!(writer.write(Severity::Error, b"one\n"));
        writer.raw_write(Severity::Warning, "two");
        assert_eq!(
            sink.lines(),
            vec![
                (Severity::Error, "one".to_string()),
                (Severity::Warning, "two".to_string())
            ]
        );
        assert_eq!(sink.with_lines(|lines| lines.len()), 2);
    }
}
