//! Three-valued outcome type shared by processors, collaborators and the
//! supervisor report.
//!
//! An [`Outcome`] is Ok, Warning or Failed plus a message and an ordered
//! list of named details. [`combine`] folds several step outcomes into one,
//! with strict precedence `Failed > Warning > Ok`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of an [`Outcome`]. Ordered so that `max` gives the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Warning,
    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The result of one step (or of several combined steps).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: Status,
    pub message: String,
    /// Named sub-results in insertion order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<(String, String)>,
}

impl Outcome {
    fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(Status::Ok, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(Status::Warning, message)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(Status::Failed, message)
    }

    /// Attach a named detail, keeping insertion order.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.push((key.into(), value.into()));
        self
    }

    /// Look up a detail by name (first match).
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn is_failed(&self) -> bool {
        self.status == Status::Failed
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.status, self.message)
    }
}

/// Combine step outcomes into one.
///
/// The status is the most severe input status (`Ok` for no input). The
/// message joins every step's message tagged with its step name. Each step
/// becomes a detail `step -> message`, followed by its own details
/// re-keyed as `step.key`.
pub fn combine<I, S>(steps: I) -> Outcome
where
    I: IntoIterator<Item = (S, Outcome)>,
    S: Into<String>,
{
    let mut status = Status::Ok;
    let mut parts = Vec::new();
    let mut details = Vec::new();

    for (step, outcome) in steps {
        let step = step.into();
        status = status.max(outcome.status);
        parts.push(format!("{step}: {}", outcome.message));
        details.push((step.clone(), outcome.message));
        details.extend(
            outcome
                .details
                .into_iter()
                .map(|(key, value)| (format!("{step}.{key}"), value)),
        );
    }

    Outcome {
        status,
        message: parts.join("; "),
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(statuses: &[Status]) -> Status {
        combine(
            statuses
                .iter()
                .enumerate()
                .map(|(i, s)| (format!("step{i}"), Outcome::new(*s, "x"))),
        )
        .status
    }

    #[test]
    fn precedence_table() {
        assert_eq!(status_of(&[Status::Ok, Status::Ok]), Status::Ok);
        assert_eq!(status_of(&[Status::Ok, Status::Warning]), Status::Warning);
        assert_eq!(status_of(&[Status::Warning, Status::Failed]), Status::Failed);
        assert_eq!(status_of(&[Status::Failed, Status::Ok, Status::Warning]), Status::Failed);
    }

    #[test]
    fn empty_combine_is_ok() {
        let combined = combine(Vec::<(String, Outcome)>::new());
        assert_eq!(combined.status, Status::Ok);
        assert!(combined.details.is_empty());
    }

    #[test]
    fn combine_tags_messages_with_step_names() {
        let combined = combine([
            ("hosts", Outcome::ok("hosts file updated")),
            ("mme.conf", Outcome::warn("file not found")),
        ]);
        assert_eq!(combined.status, Status::Warning);
        assert_eq!(
            combined.message,
            "hosts: hosts file updated; mme.conf: file not found"
        );
        assert_eq!(combined.detail("mme.conf"), Some("file not found"));
        assert_eq!(combined.details[0].0, "hosts");
    }

    #[test]
    fn combine_keeps_nested_details() {
        let combined = combine([
            ("configure", Outcome::ok("done")),
            ("status", Outcome::warn("not running").with_detail("output", "exited")),
        ]);
        assert_eq!(combined.detail("status"), Some("not running"));
        assert_eq!(combined.detail("status.output"), Some("exited"));
        assert_eq!(combined.details.len(), 3);
    }

    #[test]
    fn details_keep_insertion_order() {
        let outcome = Outcome::fail("boom").with_detail("z", "1").with_detail("a", "2");
        assert_eq!(
            outcome.details,
            vec![
                ("z".to_string(), "1".to_string()),
                ("a".to_string(), "2".to_string())
            ]
        );
        assert!(outcome.is_failed());
        assert_eq!(outcome.to_string(), "[failed] boom");
    }
}
