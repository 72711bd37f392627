//! # Logging Module / 日志模块
//!
//! This module provides the logging collaborator shared by every component.
//! Progress and errors go to a live console stream and, when configured, to an
//! append-only log file with timestamps.
//!
//! 此模块提供所有组件共享的日志协作者。
//! 进度和错误会写入实时控制台流，并在配置后附加到带时间戳的日志文件中。

use anyhow::{Context, Result};
use chrono::Local;
use colored::*;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// A logging collaborator constructed once at process start and passed into
/// each component. Console output can be suppressed for alternate report
/// modes; file output is never affected by suppression.
pub struct Logger {
    console: AtomicBool,
    file: Option<Mutex<File>>,
}

impl Logger {
    /// Creates a logger writing to the console and, optionally, to `log_file`
    /// (opened in append mode, parent directories created on demand).
    pub fn new(log_file: Option<&Path>) -> Result<Self> {
        let file = match log_file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create log directory: {}", parent.display())
                    })?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open log file: {}", path.display()))?;
                Some(Mutex::new(file))
            }
            None => None,
        };

        Ok(Self {
            console: AtomicBool::new(true),
            file,
        })
    }

    /// A logger that writes nowhere. Used by tests that only care about
    /// return values.
    pub fn silent() -> Self {
        Self {
            console: AtomicBool::new(false),
            file: None,
        }
    }

    /// Enables or disables console output. File output is unaffected.
    pub fn set_console(&self, enabled: bool) {
        self.console.store(enabled, Ordering::Relaxed);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        if self.console.load(Ordering::Relaxed) {
            println!("{}", message);
        }
        self.write_file("INFO", message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        if self.console.load(Ordering::Relaxed) {
            println!("{}", message.yellow());
        }
        self.write_file("WARN", message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        if self.console.load(Ordering::Relaxed) {
            eprintln!("{}", message.red());
        }
        self.write_file("ERROR", message);
    }

    /// Echoes an external command line about to be executed.
    pub fn command(&self, command_line: &str) {
        if self.console.load(Ordering::Relaxed) {
            println!("{} {}", "$".dimmed(), command_line.dimmed());
        }
        self.write_file("CMD", command_line);
    }

    /// Flushes the log file. Called once at process end.
    pub fn flush(&self) {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
    }

    fn write_file(&self, level: &str, message: &str) {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
                let _ = writeln!(file, "[{}] {:<5} {}", stamp, level, message);
            }
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.flush();
    }
}
