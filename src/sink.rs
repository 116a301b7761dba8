use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Append-only destination for rendered lines.
///
/// Implementations are called synchronously from the emitting thread and may
/// be shared between threads, so each `append` must land as one complete
/// entry: concurrent callers must never interleave inside an entry.
pub trait LineSink: Send + Sync {
    /// Append one rendered entry. A trailing newline is added by the sink.
    ///
    /// **Returns**
    /// - `Ok(())` once the entry was handed to the OS.
    /// - `Err(..)` on I/O failure. The router reports it and moves on to the
    ///   next destination; the entry is not retried.
    fn append(&self, entry: &str) -> io::Result<()>;

    /// Flush buffered output. Default implementation is a no-op.
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

/// File destination backed by a non-rotating [`RollingFileAppender`].
///
/// Each entry is written with a single `write_all` under a mutex, which
/// keeps lines intact across threads of this process. When the file is
/// moved away (e.g. by logrotate) the next append reopens the configured
/// path instead of writing into the renamed file.
pub struct FileSink {
    path: PathBuf,
    appender: Mutex<RollingFileAppender>,
}

impl FileSink {
    /// Open (or create) `path` for appending, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let appender = open_appender(&path)?;
        Ok(Self {
            path,
            appender: Mutex::new(appender),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_appender(path: &Path) -> io::Result<RollingFileAppender> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("not a file path: {}", path.display())))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

impl std::fmt::Debug for FileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSink").field("path", &self.path).finish()
    }
}

impl LineSink for FileSink {
    fn append(&self, entry: &str) -> io::Result<()> {
        let mut buf = String::with_capacity(entry.len() + 1);
        buf.push_str(entry);
        buf.push('\n');
        let mut appender = self
            .appender
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "file sink lock poisoned"))?;
        if !self.path.exists() {
            *appender = open_appender(&self.path)?;
        }
        appender.write_all(buf.as_bytes())
    }

    fn flush(&self) -> io::Result<()> {
        let mut appender = self
            .appender
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "file sink lock poisoned"))?;
        appender.flush()
    }
}

/// Destination over any [`Write`] handle, e.g. standard output.
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: Mutex<W>,
}

impl WriterSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> LineSink for WriterSink<W> {
    fn append(&self, entry: &str) -> io::Result<()> {
        let mut buf = String::with_capacity(entry.len() + 1);
        buf.push_str(entry);
        buf.push('\n');
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "writer sink lock poisoned"))?;
        writer.write_all(buf.as_bytes())
    }

    fn flush(&self) -> io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "writer sink lock poisoned"))?;
        writer.flush()
    }
}

/// Destination that keeps entries in memory; clones share the buffer.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<String> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl LineSink for MemorySink {
    fn append(&self, entry: &str) -> io::Result<()> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory sink lock poisoned"))?;
        guard.push(entry.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn file_sink_creates_parents_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("app.log");

        let sink = FileSink::open(&path).unwrap();
        sink.append("first").unwrap();
        drop(sink);
        let sink = FileSink::open(&path).unwrap();
        sink.append("second").unwrap();
        sink.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn reopens_configured_path_after_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let rotated = dir.path().join("app.log.1");

        let sink = FileSink::open(&path).unwrap();
        sink.append("before rotation").unwrap();
        fs::rename(&path, &rotated).unwrap();
        sink.append("after rotation").unwrap();
        sink.flush().unwrap();

        assert_eq!(fs::read_to_string(&rotated).unwrap(), "before rotation\n");
        assert_eq!(fs::read_to_string(&path).unwrap(), "after rotation\n");
    }

    #[test]
    fn writer_sink_appends_lines() {
        let sink = WriterSink::new(Vec::new());
        sink.append("one").unwrap();
        sink.append("two").unwrap();
        assert_eq!(String::from_utf8(sink.into_inner()).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn concurrent_appends_keep_lines_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let sink = Arc::new(FileSink::open(&path).unwrap());
        let line = "x".repeat(512);

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let sink = Arc::clone(&sink);
                let line = line.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        sink.append(&line).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 400);
        assert!(content.lines().all(|l| l == line));
    }
}
