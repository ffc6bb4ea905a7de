use chrono::Timelike;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const AFTER_HOURS: &str = "After Hours";

#[derive(Error, Debug, PartialEq)]
#[error("period must be a non-empty label")]
pub struct InvalidPeriod;

/// A named class time-slot such as `"9-10 AM"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period(String);

impl Period {
    pub fn new(label: impl Into<String>) -> Result<Self, InvalidPeriod> {
        let label = label.into().trim().to_string();
        if label.is_empty() {
            return Err(InvalidPeriod);
        }
        Ok(Self(label))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The teaching period that contains `hour` (0–23).
    pub fn for_hour(hour: u32) -> Self {
        let label = match hour {
            9 => "9-10 AM",
            10 => "10-11 AM",
            11 => "11-12 PM",
            12 => "12-1 PM",
            13 => "1-2 PM",
            14 => "2-3 PM",
            15 => "3-4 PM",
            16 => "4-5 PM",
            _ => AFTER_HOURS,
        };
        Self(label.to_string())
    }

    /// The period for the local wall clock.
    pub fn current() -> Self {
        Self::for_hour(chrono::Local::now().hour())
    }
}

impl TryFrom<String> for Period {
    type Error = InvalidPeriod;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Period> for String {
    fn from(p: Period) -> Self {
        p.0
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
