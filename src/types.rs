use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Canonical task identifier used throughout the scheduler.
pub type TaskId = String;

/// Canonical worker identifier.
pub type WorkerId = String;

/// Dispatch generation counter. Every dispatch gets a fresh epoch so that
/// results from an earlier attempt can be told apart from the current one.
pub type DispatchEpoch = u64;

/// What happens to the rest of the graph when a task fails for good.
///
/// - `Branch`: cancel every direct and transitive dependent of the
///   failed task; independent branches keep running (default).
/// - `Strict`: fail fast. Besides the failed branch, every other unresolved
///   task is cancelled too.
///
/// Transitive cancellation is already the `Branch` behaviour; there is no
/// policy that cancels direct dependents only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadePolicy {
    #[serde(alias = "failed_branch")]
    Branch,
    Strict,
}

impl Default for CascadePolicy {
    fn default() -> Self {
        CascadePolicy::Branch
    }
}

impl FromStr for CascadePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "branch" | "failed_branch" => Ok(CascadePolicy::Branch),
            "strict" => Ok(CascadePolicy::Strict),
            other => Err(format!(
                "invalid cascade policy: {other} (expected \"branch\" or \"strict\")"
            )),
        }
    }
}

/// How the scheduler stops.
///
/// - `Graceful`: reject new submissions, stop dispatching, let running tasks
///   finish.
/// - `Hard`: cancel every non-terminal task immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Graceful,
    Hard,
}

impl FromStr for ShutdownMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "graceful" => Ok(ShutdownMode::Graceful),
            "hard" => Ok(ShutdownMode::Hard),
            other => Err(format!(
                "invalid shutdown mode: {other} (expected \"graceful\" or \"hard\")"
            )),
        }
    }
}

/// Opaque task payload. The scheduler never looks inside; workers decide
/// what the bytes mean (the process worker treats them as a shell command).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lossy UTF-8 view, mostly for logs and shell commands.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(text) => write!(f, "Payload({text:?})"),
            Err(_) => write!(f, "Payload({} bytes)", self.0.len()),
        }
    }
}
