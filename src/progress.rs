//! Sync and analysis progress reporting.
//!
//! Reports observable progress during `convo sync` and `convo analyze` so
//! users see what is being scanned, how much is left, and which analysis
//! stage is running. Progress is emitted on **stderr** so stdout remains
//! parseable for scripts.

use serde::{Deserialize, Serialize};
use std::io::{IsTerminal, Write};

/// Stage of an analysis run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStage {
    Starting,
    Decomposing,
    Searching,
    Chunking,
    Analyzing,
    Synthesizing,
    Complete,
}

impl AnalysisStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStage::Starting => "starting",
            AnalysisStage::Decomposing => "decomposing",
            AnalysisStage::Searching => "searching",
            AnalysisStage::Chunking => "chunking",
            AnalysisStage::Analyzing => "analyzing",
            AnalysisStage::Synthesizing => "synthesizing",
            AnalysisStage::Complete => "complete",
        }
    }
}

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Walking the transcript tree. Total unknown.
    Discovering { root: String },
    /// n transcripts examined out of total.
    Indexing {
        n: u64,
        total: u64,
        session_id: String,
    },
    Analysis { stage: AnalysisStage, detail: String },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "sync  indexing  1,234 / 5,000 sessions".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Discovering { root } => format!("sync {}  discovering...\n", root),
            ProgressEvent::Indexing { n, total, .. } => format!(
                "sync  indexing  {} / {} sessions\n",
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Analysis { stage, detail } => {
                format!("analyze  {:<12} {}\n", stage.as_str(), detail)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Discovering { root } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "root": root
            }),
            ProgressEvent::Indexing {
                n,
                total,
                session_id,
            } => serde_json::json!({
                "event": "progress",
                "phase": "indexing",
                "n": n,
                "total": total,
                "session_id": session_id
            }),
            ProgressEvent::Analysis { stage, detail } => serde_json::json!({
                "event": "progress",
                "phase": "analysis",
                "stage": stage,
                "detail": detail
            }),
        };
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
        if std::io::stderr().is_terminal() {
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
