use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use anyhow::{Context, Result};
use chrono::SecondsFormat;

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Install the process-wide logger. Later calls are no-ops.
pub fn init_log_file(path: &Path) -> Result<()> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let logger = Logger::new(Some(path), true)?;
    let _ = LOGGER.set(logger);
    Ok(())
}

/// Log to stderr only, for the CLI when no log file is configured. Stdout
/// stays reserved for command output.
pub fn init_stderr() {
    if LOGGER.get().is_some() {
        return;
    }
    if let Ok(logger) = Logger::new(None, true) {
        let _ = LOGGER.set(logger);
    }
}

pub fn debug(msg: impl AsRef<str>) {
    log_kv("DEBUG", msg.as_ref(), &[]);
}

pub fn info(msg: impl AsRef<str>) {
    log_kv("INFO", msg.as_ref(), &[]);
}

pub fn warn(msg: impl AsRef<str>) {
    log_kv("WARN", msg.as_ref(), &[]);
}

pub fn error(msg: impl AsRef<str>) {
    log_kv("ERROR", msg.as_ref(), &[]);
}

pub fn debug_kv(msg: &str, kv: &[(&str, &str)]) {
    log_kv("DEBUG", msg, kv);
}

pub fn info_kv(msg: &str, kv: &[(&str, &str)]) {
    log_kv("INFO", msg, kv);
}

pub fn warn_kv(msg: &str, kv: &[(&str, &str)]) {
    log_kv("WARN", msg, kv);
}

pub fn error_kv(msg: &str, kv: &[(&str, &str)]) {
    log_kv("ERROR", msg, kv);
}

fn log_kv(level: &str, msg: &str, kv: &[(&str, &str)]) {
    if let Some(logger) = LOGGER.get() {
        if level == "DEBUG" && !logger.debug {
            return;
        }
        logger.write_kv(level, msg, kv);
    }
}

struct Logger {
    file: Option<Mutex<File>>,
    mirror_to_stderr: bool,
    debug: bool,
}

impl Logger {
    fn new(path: Option<&Path>, mirror_to_stderr: bool) -> Result<Self> {
        let file = match path {
            Some(path) => Some(Mutex::new(open_truncated(path)?)),
            None => None,
        };
        Ok(Self {
            file,
            mirror_to_stderr,
            debug: std::env::var("PEERMESH_DEBUG").ok().as_deref() == Some("1"),
        })
    }

    fn write_kv(&self, level: &str, msg: &str, kv: &[(&str, &str)]) {
        let ts = chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        if let Some(file) = &self.file {
            let line = format_structured(&ts, level, msg, kv);
            if let Ok(mut f) = file.lock() {
                let _ = f.write_all(line.as_bytes());
                let _ = f.flush();
            }
        }
        if self.mirror_to_stderr {
            let line = format_pretty(&ts, level, msg, kv);
            let mut out = std::io::stderr();
            let _ = out.write_all(line.as_bytes());
            let _ = out.flush();
        }
    }
}

// New log file per run.
fn open_truncated(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))
}

fn format_pretty(ts: &str, level: &str, msg: &str, kv: &[(&str, &str)]) -> String {
    let mut line = format!("{ts} {level} {msg}");
    for (k, v) in kv {
        line.push(' ');
        line.push_str(k);
        line.push('=');
        line.push_str(v);
    }
    line.push('\n');
    line
}

fn format_structured(ts: &str, level: &str, msg: &str, kv: &[(&str, &str)]) -> String {
    let mut line = format!("time={ts} level={level} msg=\"{}\"", escape_value(msg));
    for (k, v) in kv {
        line.push(' ');
        line.push_str(k);
        line.push('=');
        if v.contains(' ') || v.contains('"') {
            line.push('"');
            line.push_str(&escape_value(v));
            line.push('"');
        } else {
            line.push_str(v);
        }
    }
    line.push('\n');
    line
}

fn escape_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}
