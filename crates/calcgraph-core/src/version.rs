use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::{CalcGraphError, Result};

/// Wall-clock instant used for both valid time and correction time.
pub type Timestamp = DateTime<Utc>;

const LATEST_TEXT: &str = "LATEST";

/// A (valid-time, correction-time) point used to resolve the authoritative
/// version of an entity. `None` on either axis means "latest".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VersionCorrection {
    version_as_of: Option<Timestamp>,
    corrected_to: Option<Timestamp>,
}

impl VersionCorrection {
    pub const LATEST: VersionCorrection = VersionCorrection {
        version_as_of: None,
        corrected_to: None,
    };

    pub fn of(version_as_of: Option<Timestamp>, corrected_to: Option<Timestamp>) -> Self {
        Self {
            version_as_of,
            corrected_to,
        }
    }

    pub fn of_version_as_of(version_as_of: Timestamp) -> Self {
        Self::of(Some(version_as_of), None)
    }

    pub fn of_corrected_to(corrected_to: Timestamp) -> Self {
        Self::of(None, Some(corrected_to))
    }

    pub fn version_as_of(&self) -> Option<Timestamp> {
        self.version_as_of
    }

    pub fn corrected_to(&self) -> Option<Timestamp> {
        self.corrected_to
    }

    pub fn with_version_as_of(self, version_as_of: Option<Timestamp>) -> Self {
        Self {
            version_as_of,
            ..self
        }
    }

    pub fn with_corrected_to(self, corrected_to: Option<Timestamp>) -> Self {
        Self {
            corrected_to,
            ..self
        }
    }

    pub fn contains_latest(&self) -> bool {
        self.version_as_of.is_none() || self.corrected_to.is_none()
    }

    /// Replaces any "latest" axis with `now`, producing a fully fixed point.
    pub fn with_latest_fixed(self, now: Timestamp) -> Self {
        Self {
            version_as_of: Some(self.version_as_of.unwrap_or(now)),
            corrected_to: Some(self.corrected_to.unwrap_or(now)),
        }
    }

    /// Parses the `V<instant|LATEST>.C<instant|LATEST>` form produced by `Display`.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid =
            || CalcGraphError::InvalidIdentifier(format!("invalid version-correction: {text}"));
        let rest = text.strip_prefix('V').ok_or_else(invalid)?;
        let (version, correction) = rest.split_once(".C").ok_or_else(invalid)?;
        let version_as_of = parse_point(version).ok_or_else(invalid)?;
        let corrected_to = parse_point(correction).ok_or_else(invalid)?;
        Ok(Self::of(version_as_of, corrected_to))
    }
}

fn parse_point(text: &str) -> Option<Option<Timestamp>> {
    if text == LATEST_TEXT {
        return Some(None);
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|instant| Some(instant.with_timezone(&Utc)))
}

fn format_point(point: Option<Timestamp>) -> String {
    match point {
        Some(instant) => instant.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        None => LATEST_TEXT.to_string(),
    }
}

// Latest sorts after every fixed instant.
fn cmp_latest_last(a: &Option<Timestamp>, b: &Option<Timestamp>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
    }
}

impl Ord for VersionCorrection {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_latest_last(&self.version_as_of, &other.version_as_of)
            .then_with(|| cmp_latest_last(&self.corrected_to, &other.corrected_to))
    }
}

impl PartialOrd for VersionCorrection {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionCorrection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "V{}.C{}",
            format_point(self.version_as_of),
            format_point(self.corrected_to)
        )
    }
}

impl FromStr for VersionCorrection {
    type Err = CalcGraphError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Half-open window `[from, to)`; a missing end is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct VersionWindow {
    from: Option<Timestamp>,
    to: Option<Timestamp>,
}

impl VersionWindow {
    pub fn new(from: Option<Timestamp>, to: Option<Timestamp>) -> Result<Self> {
        if let (Some(from), Some(to)) = (from, to) {
            if from >= to {
                return Err(CalcGraphError::InvalidVersionWindow(format!(
                    "from {} is not before to {}",
                    format_point(Some(from)),
                    format_point(Some(to))
                )));
            }
        }
        Ok(Self { from, to })
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn starting(from: Timestamp) -> Self {
        Self {
            from: Some(from),
            to: None,
        }
    }

    pub fn from(&self) -> Option<Timestamp> {
        self.from
    }

    pub fn to(&self) -> Option<Timestamp> {
        self.to
    }

    pub fn is_open_ended(&self) -> bool {
        self.to.is_none()
    }

    pub fn contains(&self, instant: Timestamp) -> bool {
        self.from.map_or(true, |from| from <= instant) && self.to.map_or(true, |to| instant < to)
    }
}

impl fmt::Display for VersionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let from = self.from.map_or_else(|| "-inf".to_string(), |t| format_point(Some(t)));
        let to = self.to.map_or_else(|| "+inf".to_string(), |t| format_point(Some(t)));
        write!(f, "[{from}, {to})")
    }
}

#[derive(Debug, Clone)]
pub struct VersionedEntry<T> {
    pub version: VersionWindow,
    pub correction: VersionWindow,
    pub value: T,
}

/// Bitemporal history of one entity.
///
/// Among the entries whose correction window contains a given correction
/// instant, version windows never overlap, so a fixed [`VersionCorrection`]
/// resolves to at most one entry.
#[derive(Debug, Clone)]
pub struct VersionHistory<T> {
    entries: Vec<VersionedEntry<T>>,
}

impl<T: Clone> VersionHistory<T> {
    pub fn created(value: T, at: Timestamp) -> Self {
        Self {
            entries: vec![VersionedEntry {
                version: VersionWindow::starting(at),
                correction: VersionWindow::starting(at),
                value,
            }],
        }
    }

    pub fn entries(&self) -> &[VersionedEntry<T>] {
        &self.entries
    }

    pub fn resolve(&self, version_correction: VersionCorrection, now: Timestamp) -> Option<&T> {
        let fixed = version_correction.with_latest_fixed(now);
        let version = fixed.version_as_of?;
        let correction = fixed.corrected_to?;
        self.entries
            .iter()
            .find(|e| e.version.contains(version) && e.correction.contains(correction))
            .map(|e| &e.value)
    }

    /// Whether the entity has a live, open-ended version in the latest correction.
    pub fn is_live(&self) -> bool {
        self.current_index().is_some()
    }

    /// Ends the current version at `at`, optionally starting a new one with
    /// `replacement`. Returns the window of the change.
    pub fn supersede(&mut self, replacement: Option<T>, at: Timestamp) -> Result<VersionWindow> {
        let index = self.current_index().ok_or_else(|| {
            CalcGraphError::InvalidOperation("entity has no current version".to_string())
        })?;
        let current = &self.entries[index];
        let ended_version = VersionWindow::new(current.version.from, Some(at))?;
        let closed_correction = VersionWindow::new(current.correction.from, Some(at))?;
        let previous = current.value.clone();

        self.entries[index].correction = closed_correction;
        self.entries.push(VersionedEntry {
            version: ended_version,
            correction: VersionWindow::starting(at),
            value: previous,
        });
        if let Some(value) = replacement {
            self.entries.push(VersionedEntry {
                version: VersionWindow::starting(at),
                correction: VersionWindow::starting(at),
                value,
            });
        }
        Ok(VersionWindow::starting(at))
    }

    /// Replaces the value of the current version from correction instant `at`
    /// onwards. Returns the (unchanged) version window that was corrected.
    pub fn correct(&mut self, value: T, at: Timestamp) -> Result<VersionWindow> {
        let index = self.current_index().ok_or_else(|| {
            CalcGraphError::InvalidOperation("entity has no current version".to_string())
        })?;
        let current = &self.entries[index];
        let closed_correction = VersionWindow::new(current.correction.from, Some(at))?;
        let version = current.version;

        self.entries[index].correction = closed_correction;
        self.entries.push(VersionedEntry {
            version,
            correction: VersionWindow::starting(at),
            value,
        });
        Ok(version)
    }

    fn current_index(&self) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.version.is_open_ended() && e.correction.is_open_ended())
    }
}
