use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage of the analysis pipeline reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    Queued,
    Connecting,
    Fetching,
    FetchingVideo,
    FetchingComments,
    AnalyzingSentiment,
    Classifying,
    ExtractingInsights,
    GeneratingSummary,
    Saving,
    Completed,
    Failed,
    /// A step this client does not know yet.
    #[serde(other)]
    Unknown,
}

impl ProgressStep {
    /// Terminal steps end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStep::Completed | ProgressStep::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStep::Queued => "queued",
            ProgressStep::Connecting => "connecting",
            ProgressStep::Fetching => "fetching",
            ProgressStep::FetchingVideo => "fetching_video",
            ProgressStep::FetchingComments => "fetching_comments",
            ProgressStep::AnalyzingSentiment => "analyzing_sentiment",
            ProgressStep::Classifying => "classifying",
            ProgressStep::ExtractingInsights => "extracting_insights",
            ProgressStep::GeneratingSummary => "generating_summary",
            ProgressStep::Saving => "saving",
            ProgressStep::Completed => "completed",
            ProgressStep::Failed => "failed",
            ProgressStep::Unknown => "unknown",
        }
    }

    /// Fallback label for frames that carry no message of their own.
    pub fn label(&self) -> &'static str {
        match self {
            ProgressStep::Queued => "Queued",
            ProgressStep::Connecting => "Connecting to YouTube",
            ProgressStep::Fetching => "Fetching data",
            ProgressStep::FetchingVideo => "Fetching video metadata",
            ProgressStep::FetchingComments => "Selecting quality comments",
            ProgressStep::AnalyzingSentiment => "Analyzing sentiment",
            ProgressStep::Classifying => "Categorizing comments",
            ProgressStep::ExtractingInsights => "Extracting insights",
            ProgressStep::GeneratingSummary => "Generating summary",
            ProgressStep::Saving => "Saving results",
            ProgressStep::Completed => "Analysis complete",
            ProgressStep::Failed => "Analysis failed",
            ProgressStep::Unknown => "Processing",
        }
    }
}

impl fmt::Display for ProgressStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressCounters {
    pub comments_fetched: u64,
    pub total_comments: u64,
}

/// One decoded progress update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub step: ProgressStep,
    /// 0..=100
    pub percent: u8,
    pub message: Option<String>,
    pub counters: Option<ProgressCounters>,
    pub error: Option<String>,
    pub video_id: Option<String>,
    pub video_title: Option<String>,
}

impl ProgressEvent {
    pub fn new(step: ProgressStep, percent: u8) -> Self {
        Self {
            step,
            percent,
            message: None,
            counters: None,
            error: None,
            video_id: None,
            video_title: None,
        }
    }

    /// Decodes one `data:` payload.
    pub fn from_payload(payload: &str) -> Result<Self> {
        let frame: ProgressFrame =
            serde_json::from_str(payload).context("Progress payload is not valid JSON")?;
        frame.into_event()
    }

    /// Server message, or the step's own label.
    pub fn display_message(&self) -> &str {
        self.message.as_deref().unwrap_or_else(|| self.step.label())
    }

    pub fn is_terminal(&self) -> bool {
        self.step.is_terminal()
    }
}

/// Wire shape. The server has used both `percent`/`message` and
/// `progress`/`step_label` for the same values.
#[derive(Debug, Deserialize)]
pub(crate) struct ProgressFrame {
    step: ProgressStep,
    #[serde(default)]
    percent: Option<i64>,
    #[serde(default)]
    progress: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    step_label: Option<String>,
    #[serde(default)]
    comments_fetched: Option<u64>,
    #[serde(default)]
    total_comments: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    video_id: Option<String>,
    #[serde(default)]
    video_title: Option<String>,
}

impl ProgressFrame {
    pub(crate) fn into_event(self) -> Result<ProgressEvent> {
        let raw = self
            .percent
            .or(self.progress)
            .context("Progress payload has no percent")?;
        let percent = u8::try_from(raw)
            .ok()
            .filter(|p| *p <= 100)
            .with_context(|| format!("Percent out of range: {}", raw))?;

        let counters = match (self.comments_fetched, self.total_comments) {
            (None, None) => None,
            (fetched, total) => Some(ProgressCounters {
                comments_fetched: fetched.unwrap_or_default(),
                total_comments: total.unwrap_or_default(),
            }),
        };

        Ok(ProgressEvent {
            step: self.step,
            percent,
            message: self.message.or(self.step_label).filter(|m| !m.is_empty()),
            counters,
            error: self.error.filter(|e| !e.is_empty()),
            video_id: self.video_id,
            video_title: self.video_title,
        })
    }
}

#[cfg(test)]
#[path = "tests/event_tests.rs"]
mod tests;
