// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! File sink: NDJSON append with size-based rotation.
//!
//! Rotated generations are renamed with a timestamp suffix, optionally
//! gzipped, and pruned down to `max_files`.

use crate::error::{ConfigError, TransportError};
use crate::record::LogRecord;
use crate::transport::{Transport, TransportConfig, TransportStats};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use vestig_common::runtime::runtime;
use vestig_common::MutexExt;

/// Settings for [`FileTransport`].
#[derive(Debug, Clone)]
pub struct FileTransportConfig {
    /// Path of the live log file.
    pub path: PathBuf,
    /// Rotate once the live file reaches this size. 0 disables rotation.
    pub max_size: u64,
    /// Total generations (live + rotated) kept on disk. 0 disables cleanup.
    pub max_files: u64,
    /// Gzip rotated generations.
    pub compress: bool,
    pub transport: TransportConfig,
}

impl FileTransportConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_size: 10 * 1024 * 1024,
            max_files: 5,
            compress: false,
            transport: TransportConfig::default(),
        }
    }
}

struct FileAppender {
    path: PathBuf,
    current_size: u64,
    max_size: u64,
    max_files: u64,
    compress: bool,
    current_file: fs::File,
}

impl FileAppender {
    fn new(config: &FileTransportConfig) -> io::Result<Self> {
        if config.path.as_os_str().is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty path"));
        }
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;
        let current_size = file.metadata()?.len();
        Ok(Self {
            path: config.path.clone(),
            current_size,
            max_size: config.max_size,
            max_files: config.max_files,
            compress: config.compress,
            current_file: file,
        })
    }

    fn timestamp_string() -> String {
        chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S%.3f").to_string()
    }

    // Rotated generations keep the extension: `app_<ts>.log` (plus `.gz`
    // when compressed).
    fn rotated_path(&self, timestamp: &str) -> PathBuf {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        match (self.path.file_stem(), self.path.extension()) {
            (Some(stem), Some(ext)) => parent.join(format!(
                "{}_{}.{}",
                stem.to_string_lossy(),
                timestamp,
                ext.to_string_lossy()
            )),
            (Some(stem), None) => parent.join(format!("{}_{}", stem.to_string_lossy(), timestamp)),
            (None, _) => PathBuf::from(format!("{}_{}", self.path.display(), timestamp)),
        }
    }

    fn rotate_if_needed(&mut self) -> io::Result<()> {
        if self.max_size == 0 || self.current_size < self.max_size {
            return Ok(());
        }
        self.current_file.flush()?;

        let rotated = self.rotated_path(&Self::timestamp_string());
        fs::rename(&self.path, &rotated)?;
        if self.compress {
            compress_file(&rotated)?;
        }

        self.current_file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.current_size = 0;

        if self.max_files > 0 {
            self.cleanup_old_files()?;
        }
        Ok(())
    }

    // Rotated names embed their timestamp, so a name sort is an age sort.
    fn cleanup_old_files(&self) -> io::Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let Some(stem) = self.path.file_stem() else {
            return Ok(());
        };
        let prefix = format!("{}_", stem.to_string_lossy());

        let mut rotated: Vec<(PathBuf, String)> = fs::read_dir(parent)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.starts_with(&prefix)
                    .then(|| (entry.path(), name))
            })
            .collect();

        // Newest first.
        rotated.sort_by(|(_, a), (_, b)| b.cmp(a));

        let keep = self.max_files.saturating_sub(1) as usize;
        for (path, _) in rotated.iter().skip(keep) {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn append_line(&mut self, line: &str) -> io::Result<()> {
        self.rotate_if_needed()?;
        self.current_file.write_all(line.as_bytes())?;
        self.current_file.write_all(b"\n")?;
        self.current_size += line.len() as u64 + 1;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.current_file.flush()
    }
}

fn compress_file(path: &Path) -> io::Result<()> {
    let source = fs::read(path)?;
    let target = {
        let mut name = path.as_os_str().to_owned();
        name.push(".gz");
        PathBuf::from(name)
    };
    let file = fs::File::create(&target)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(&source)?;
    encoder.finish()?;
    fs::remove_file(path)
}

/// Appends one JSON line per record. Construction fails on hosts without a
/// filesystem.
pub struct FileTransport {
    config: TransportConfig,
    appender: Mutex<FileAppender>,
    destroyed: AtomicBool,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl FileTransport {
    pub fn new(config: FileTransportConfig) -> Result<Self, ConfigError> {
        if !runtime().capabilities.has_filesystem {
            return Err(ConfigError::FilesystemUnavailable);
        }
        let appender = FileAppender::new(&config)
            .map_err(|e| ConfigError::Invalid(format!("cannot open log file: {e}")))?;
        Ok(Self {
            config: config.transport,
            appender: Mutex::new(appender),
            destroyed: AtomicBool::new(false),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl Transport for FileTransport {
    fn name(&self) -> &str {
        "file"
    }

    fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn log(&self, record: LogRecord) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "record not serializable, dropped");
                return;
            }
        };
        let result = self.appender.lock_or_panic().append_line(&line);
        match result {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "file append failed, record dropped");
            }
        }
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.appender.lock_or_panic().flush()?;
        Ok(())
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.flush().await
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LogLevel;
    use crate::record::test_record;
    use tempfile::TempDir;

    fn config(dir: &TempDir, max_size: u64, max_files: u64) -> FileTransportConfig {
        FileTransportConfig {
            path: dir.path().join("app.log"),
            max_size,
            max_files,
            compress: false,
            transport: TransportConfig::default(),
        }
    }

    fn generation_count(dir: &TempDir) -> usize {
        fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("app"))
            .count()
    }

    #[test]
    fn appends_ndjson_lines() {
        let dir = TempDir::new().unwrap();
        let transport = FileTransport::new(config(&dir, 0, 0)).unwrap();
        transport.log(test_record(LogLevel::Info, None));
        transport.log(test_record(LogLevel::Warn, Some("api")));
        transport.appender.lock().unwrap().flush().unwrap();

        let content = fs::read_to_string(dir.path().join("app.log")).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(value["level"].is_string());
        }
        assert_eq!(transport.stats().sent, 2);
    }

    #[test]
    fn rotates_at_max_size() {
        let dir = TempDir::new().unwrap();
        let transport = FileTransport::new(config(&dir, 64, 0)).unwrap();
        for _ in 0..5 {
            transport.log(test_record(LogLevel::Info, None));
        }
        assert!(generation_count(&dir) >= 2);
        assert!(dir.path().join("app.log").exists());
    }

    #[test]
    fn cleanup_keeps_max_files_generations() {
        let dir = TempDir::new().unwrap();
        let transport = FileTransport::new(config(&dir, 64, 2)).unwrap();
        for _ in 0..20 {
            transport.log(test_record(LogLevel::Info, None));
        }
        assert_eq!(generation_count(&dir), 2);
        assert!(dir.path().join("app.log").exists());
    }

    #[test]
    fn compressed_rotation_produces_gz() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, 64, 0);
        cfg.compress = true;
        let transport = FileTransport::new(cfg).unwrap();
        for _ in 0..5 {
            transport.log(test_record(LogLevel::Info, None));
        }
        let has_gz = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().ends_with(".gz"));
        assert!(has_gz);
    }

    #[test]
    fn empty_path_fails_construction() {
        let result = FileTransport::new(FileTransportConfig::new(""));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn destroyed_file_transport_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let transport = FileTransport::new(config(&dir, 0, 0)).unwrap();
        transport.destroy().await.unwrap();
        transport.log(test_record(LogLevel::Info, None));
        assert_eq!(transport.stats().sent, 0);
    }
}
