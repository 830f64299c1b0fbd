//! Timecode parsing and formatting
//!
//! Timecodes are whole seconds from the start of the source tape, displayed
//! as `HH:MM:SS`. One-second resolution matches the 1 fps proxy the analysis
//! service sees, so finer precision would be false accuracy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// A point in time within a source video, in whole seconds
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Timecode(u32);

impl Timecode {
    pub fn from_secs(secs: u32) -> Self {
        Timecode(secs)
    }

    pub fn as_secs(&self) -> u32 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0 as u64)
    }

    /// Duration from `self` to `other`, saturating at zero when reversed
    pub fn span_to(&self, other: Timecode) -> Duration {
        Duration::from_secs(other.0.saturating_sub(self.0) as u64)
    }

    /// Shift by an offset in seconds (chunk start within the original tape)
    pub fn offset_by(&self, offset_secs: u32) -> Timecode {
        Timecode(self.0 + offset_secs)
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, rem) = (self.0 / 3600, self.0 % 3600);
        let (m, s) = (rem / 60, rem % 60);
        write!(f, "{:02}:{:02}:{:02}", h, m, s)
    }
}

impl FromStr for Timecode {
    type Err = Error;

    /// Parses `HH:MM:SS` or `MM:SS`
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        let parse = |p: &str| -> Result<u32> {
            p.parse::<u32>()
                .map_err(|_| Error::InvalidInput(format!("Invalid timecode component: {:?}", s)))
        };
        match parts.as_slice() {
            [h, m, sec] => Ok(Timecode(parse(h)? * 3600 + parse(m)? * 60 + parse(sec)?)),
            [m, sec] => Ok(Timecode(parse(m)? * 60 + parse(sec)?)),
            _ => Err(Error::InvalidInput(format!("Invalid timecode: {:?}", s))),
        }
    }
}

impl TryFrom<String> for Timecode {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Timecode> for String {
    fn from(tc: Timecode) -> String {
        tc.to_string()
    }
}
