//! Fetch and load progress reporting.
//!
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.
//! Log output goes through `tracing`; these lines are the user-facing
//! counterpart shown while a long run is in progress.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A page arrived from the upstream.
    Fetched {
        source: String,
        page: usize,
        records: usize,
        total: usize,
    },
    /// A batch finished writing to the target store.
    Loaded {
        batch: usize,
        records: usize,
        total: usize,
    },
}

/// Reports pipeline progress.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "fetch github  page 3  +100 (300 total)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Fetched {
                source,
                page,
                records,
                total,
            } => format!(
                "fetch {}  page {}  +{} ({} total)\n",
                source,
                page,
                records,
                format_number(*total as u64)
            ),
            ProgressEvent::Loaded {
                batch,
                records,
                total,
            } => format!(
                "load  batch {}  +{} ({} total)\n",
                batch,
                records,
                format_number(*total as u64)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Fetched {
                source,
                page,
                records,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "fetch",
                "source": source,
                "page": page,
                "records": records,
                "total": total
            }),
            ProgressEvent::Loaded {
                batch,
                records,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "load",
                "batch": batch,
                "records": records,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
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

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!("unknown progress mode '{}': use off, human, or json", other)),
        }
    }
}
