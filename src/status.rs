use serde::{Serialize, Serializer};
use serde_json::Value;

/// Ordered progress stages for one (child, work) pair.
///
/// Stored as an ordinal (0..=3) in SQLite and exchanged as the canonical
/// string form over IPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProgressStatus {
    NotStarted,
    Presented,
    Practicing,
    Mastered,
}

impl ProgressStatus {
    pub fn ordinal(self) -> i64 {
        match self {
            Self::NotStarted => 0,
            Self::Presented => 1,
            Self::Practicing => 2,
            Self::Mastered => 3,
        }
    }

    /// Out-of-range ordinals fall back to `NotStarted`.
    pub fn from_ordinal(n: i64) -> Self {
        match n {
            1 => Self::Presented,
            2 => Self::Practicing,
            3 => Self::Mastered,
            _ => Self::NotStarted,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Presented => "presented",
            Self::Practicing => "practicing",
            Self::Mastered => "mastered",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "Not Started",
            Self::Presented => "Presented",
            Self::Practicing => "Practicing",
            Self::Mastered => "Mastered",
        }
    }

    /// Strict parse of the string enum, including legacy aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "not_started" => Some(Self::NotStarted),
            "presented" => Some(Self::Presented),
            "practicing" | "in_progress" => Some(Self::Practicing),
            "mastered" | "completed" => Some(Self::Mastered),
            _ => None,
        }
    }

    /// Typed ingress for status values that arrive either as an ordinal or
    /// as a string. Anything else is rejected rather than guessed.
    pub fn from_json(v: &Value) -> Option<Self> {
        match v {
            Value::Number(n) => match n.as_i64() {
                Some(i) if (0..=3).contains(&i) => Some(Self::from_ordinal(i)),
                _ => None,
            },
            Value::String(s) => Self::parse(s),
            _ => None,
        }
    }
}

impl Serialize for ProgressStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
