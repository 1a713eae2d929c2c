//! Pipeline progress reporting.
//!
//! Reports observable progress while files are extracted, articles chunked,
//! and chunks embedded, so long runs over a large corpus are not silent.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// Pipeline stage a progress event belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    Extract,
    Chunk,
    Embed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Chunk => "chunk",
            Stage::Embed => "embed",
        }
    }

    fn unit(&self) -> &'static str {
        match self {
            Stage::Extract => "files",
            Stage::Chunk => "articles",
            Stage::Embed => "chunks",
        }
    }
}

/// A single progress event: `n` of `total` units of `stage` are done.
#[derive(Clone, Debug)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub n: u64,
    pub total: u64,
}

/// Reports pipeline progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "embed  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = format!(
            "{}  {} / {} {}\n",
            event.stage.as_str(),
            format_number(event.n),
            format_number(event.total),
            event.stage.unit()
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "stage": event.stage.as_str(),
            "n": event.n,
            "total": event.total
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
