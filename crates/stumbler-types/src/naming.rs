//! Batch file naming codec.
//!
//! Every persisted batch carries its metadata in its filename; there is no
//! sidecar index. A name looks like:
//!
//! ```text
//! reports-t1406863343313-r4-w25-c7.gz
//!         |              |  |   |
//!         |              |  |   +-- cell observations
//!         |              |  +------ wifi observations
//!         |              +--------- reports
//!         +------------------------ write time, ms since the Unix epoch
//! ```
//!
//! # Example
//!
//! ```
//! use stumbler_types::BatchName;
//!
//! let name = BatchName::new(1_406_863_343_313, 4, 25, 7);
//! assert_eq!(name.to_string(), "reports-t1406863343313-r4-w25-c7.gz");
//!
//! let parsed: BatchName = "reports-t1406863343313-r4-w25-c7.gz".parse()?;
//! assert_eq!(parsed, name);
//! # Ok::<(), stumbler_types::ParseError>(())
//! ```

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ParseError, ParseResult};

/// Prefix shared by every batch filename.
pub const FILENAME_PREFIX: &str = "reports";
/// Extension shared by every batch filename.
pub const FILENAME_SUFFIX: &str = ".gz";

/// Marker preceding the write timestamp.
pub const SEP_TIME_MS: &str = "-t";
/// Marker preceding the report count.
pub const SEP_REPORT_COUNT: &str = "-r";
/// Marker preceding the wifi observation count.
pub const SEP_WIFI_COUNT: &str = "-w";
/// Marker preceding the cell observation count.
pub const SEP_CELL_COUNT: &str = "-c";

/// Metadata of a persisted batch, as encoded in its filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatchName {
    /// Write time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Number of reports in the batch.
    pub reports: u32,
    /// Number of wifi observations across those reports.
    pub wifis: u32,
    /// Number of cell observations across those reports.
    pub cells: u32,
}

impl BatchName {
    /// Create a name from explicit metadata.
    #[must_use]
    pub fn new(timestamp_ms: u64, reports: u32, wifis: u32, cells: u32) -> Self {
        Self {
            timestamp_ms,
            reports,
            wifis,
            cells,
        }
    }

    /// Create a name stamped with the current wall-clock time.
    #[must_use]
    pub fn now(reports: u32, wifis: u32, cells: u32) -> Self {
        Self::new(now_ms(), reports, wifis, cells)
    }

    /// Same metadata with a different timestamp.
    #[must_use]
    pub fn with_timestamp(self, timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            ..self
        }
    }

    /// The write time as a date-time, if it is representable.
    pub fn written_at(&self) -> Option<OffsetDateTime> {
        let nanos = i128::from(self.timestamp_ms) * 1_000_000;
        OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
    }

    /// Extract the integer following `marker` in `name`.
    ///
    /// The value runs up to the next `-`, or the next `.` when no `-`
    /// follows. This is the raw field decoder; [`BatchName::parse`] also
    /// validates the overall shape of the name.
    pub fn field(name: &str, marker: &str) -> ParseResult<u64> {
        let start = name
            .find(marker)
            .map(|pos| pos + marker.len())
            .ok_or_else(|| ParseError::batch_name(name, format!("missing '{}' marker", marker)))?;

        let rest = &name[start..];
        let end = rest
            .find('-')
            .or_else(|| rest.find('.'))
            .ok_or_else(|| {
                ParseError::batch_name(name, format!("unterminated '{}' field", marker))
            })?;

        rest[..end].parse::<u64>().map_err(|e| {
            ParseError::batch_name(name, format!("bad '{}' value '{}': {}", marker, &rest[..end], e))
        })
    }

    /// Decode a filename produced by this codec.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidBatchName`] if a marker is missing, a
    /// field is not a number, or the name is not in canonical form.
    pub fn parse(name: &str) -> ParseResult<Self> {
        if !name.starts_with(FILENAME_PREFIX) || !name.ends_with(FILENAME_SUFFIX) {
            return Err(ParseError::batch_name(
                name,
                format!("expected '{}...{}'", FILENAME_PREFIX, FILENAME_SUFFIX),
            ));
        }

        let parsed = Self {
            timestamp_ms: Self::field(name, SEP_TIME_MS)?,
            reports: count_field(name, SEP_REPORT_COUNT)?,
            wifis: count_field(name, SEP_WIFI_COUNT)?,
            cells: count_field(name, SEP_CELL_COUNT)?,
        };

        // Rejects reordered markers, leading zeros, '+' signs and trailing junk.
        if parsed.to_string() != name {
            return Err(ParseError::batch_name(name, "not in canonical form"));
        }

        Ok(parsed)
    }
}

fn count_field(name: &str, marker: &str) -> ParseResult<u32> {
    let value = BatchName::field(name, marker)?;
    u32::try_from(value).map_err(|_| {
        ParseError::batch_name(name, format!("'{}' value {} out of range", marker, value))
    })
}

impl fmt::Display for BatchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}{}{}{}{}{}",
            FILENAME_PREFIX,
            SEP_TIME_MS,
            self.timestamp_ms,
            SEP_REPORT_COUNT,
            self.reports,
            SEP_WIFI_COUNT,
            self.wifis,
            SEP_CELL_COUNT,
            self.cells,
            FILENAME_SUFFIX
        )
    }
}

impl FromStr for BatchName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    u64::try_from(nanos / 1_000_000).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_matches_documented_format() {
        let name = BatchName::new(1_406_863_343_313, 4, 25, 7);
        assert_eq!(name.to_string(), "reports-t1406863343313-r4-w25-c7.gz");
    }

    #[test]
    fn test_field_reads_up_to_dash() {
        let name = "reports-t1406863343313-r4-w25-c7.gz";
        assert_eq!(BatchName::field(name, SEP_TIME_MS).unwrap(), 1_406_863_343_313);
        assert_eq!(BatchName::field(name, SEP_REPORT_COUNT).unwrap(), 4);
        assert_eq!(BatchName::field(name, SEP_WIFI_COUNT).unwrap(), 25);
    }

    #[test]
    fn test_field_falls_back_to_dot() {
        let name = "reports-t1-r4-w25-c7.gz";
        assert_eq!(BatchName::field(name, SEP_CELL_COUNT).unwrap(), 7);
    }

    #[test]
    fn test_missing_marker_is_an_error() {
        let err = BatchName::parse("reports-t100-r4-w25.gz").unwrap_err();
        assert!(err.to_string().contains("missing '-c' marker"));
    }

    #[test]
    fn test_non_numeric_field_is_an_error() {
        let err = BatchName::parse("reports-tabc-r4-w25-c7.gz").unwrap_err();
        assert!(err.to_string().contains("bad '-t' value"));
    }

    #[test]
    fn test_wrong_prefix_or_suffix_is_an_error() {
        assert!(BatchName::parse("upload_stats.ini").is_err());
        assert!(BatchName::parse("reports-t1-r1-w1-c1.gz.tmp").is_err());
        assert!(BatchName::parse("other-t1-r1-w1-c1.gz").is_err());
    }

    #[test]
    fn test_non_canonical_names_are_rejected() {
        assert!(BatchName::parse("reports-t01-r1-w1-c1.gz").is_err());
        assert!(BatchName::parse("reports-t1-r+1-w1-c1.gz").is_err());
        assert!(BatchName::parse("reports-t1-w1-r1-c1.gz").is_err());
    }

    #[test]
    fn test_count_out_of_range() {
        let err = BatchName::parse("reports-t1-r4294967296-w0-c0.gz").unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_with_timestamp_keeps_counts() {
        let name = BatchName::new(10, 1, 2, 3).with_timestamp(11);
        assert_eq!(name, BatchName::new(11, 1, 2, 3));
    }

    #[test]
    fn test_written_at() {
        let name = BatchName::new(1_000, 0, 0, 0);
        let at = name.written_at().unwrap();
        assert_eq!(at.unix_timestamp(), 1);
    }

    #[test]
    fn test_ordering_is_oldest_first() {
        let older = BatchName::new(1, 9, 9, 9);
        let newer = BatchName::new(2, 0, 0, 0);
        assert!(older < newer);
    }

    proptest! {
        /// Every name the codec produces decodes back to the same metadata.
        #[test]
        fn encode_decode_roundtrip(t: u64, r: u32, w: u32, c: u32) {
            let name = BatchName::new(t, r, w, c);
            let decoded = BatchName::parse(&name.to_string()).unwrap();
            prop_assert_eq!(decoded, name);
        }

        /// Decoding arbitrary strings should never panic.
        #[test]
        fn parse_never_panics(s in ".*") {
            let _ = BatchName::parse(&s);
        }
    }
}
