//! In-memory report accumulator and batch compression.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use stumbler_types::Report;

use crate::config::BatchFraming;
use crate::error::{Error, Result};

/// Accumulates reports in memory until they are persisted or promoted.
///
/// The wifi and cell totals always equal the sum over the held reports.
#[derive(Debug)]
pub struct ReportBatchBuilder {
    reports: Vec<String>,
    wifis: u32,
    cells: u32,
    max_reports: usize,
    framing: BatchFraming,
}

impl ReportBatchBuilder {
    /// Create an empty accumulator.
    pub fn new(max_reports: usize, framing: BatchFraming) -> Self {
        Self {
            reports: Vec::new(),
            wifis: 0,
            cells: 0,
            max_reports,
            framing,
        }
    }

    /// Append a report.
    pub fn add_report(&mut self, report: Report) {
        self.wifis = self.wifis.saturating_add(report.wifis);
        self.cells = self.cells.saturating_add(report.cells);
        self.reports.push(report.payload);
    }

    /// Number of reports held.
    pub fn reports_count(&self) -> usize {
        self.reports.len()
    }

    /// Wifi observations across held reports.
    pub fn wifis(&self) -> u32 {
        self.wifis
    }

    /// Cell observations across held reports.
    pub fn cells(&self) -> u32 {
        self.cells
    }

    /// Returns true when no reports are held.
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// True once the accumulator holds the configured maximum.
    pub fn max_reports_reached(&self) -> bool {
        self.reports.len() >= self.max_reports
    }

    /// Join the held payloads into one text blob.
    pub fn finalize_reports(&self) -> String {
        match self.framing {
            BatchFraming::Lines => {
                let mut out = self.reports.join("\n");
                if !out.is_empty() {
                    out.push('\n');
                }
                out
            }
            BatchFraming::JsonItems => format!("{{\"items\":[{}]}}", self.reports.join(",")),
        }
    }

    /// Finalize and compress the held reports.
    pub fn encode(&self) -> Result<Vec<u8>> {
        compress(self.finalize_reports().as_bytes())
    }

    /// Drop all held reports and reset the counts.
    pub fn clear(&mut self) {
        self.reports.clear();
        self.wifis = 0;
        self.cells = 0;
    }
}

/// Gzip-compress `data`.
///
/// An encoder that produces no output is treated as a failure; callers
/// must never mistake it for an empty batch.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(Error::Encode)?;
    let compressed = encoder.finish().map_err(Error::Encode)?;
    if compressed.is_empty() {
        return Err(Error::Encode(std::io::Error::other(
            "gzip encoder produced no output",
        )));
    }
    Ok(compressed)
}

/// Decompress a batch payload back to its report text.
pub fn decode_batch(data: &[u8]) -> Result<String> {
    let mut decoder = GzDecoder::new(data);
    let mut text = String::new();
    decoder.read_to_string(&mut text).map_err(Error::Decode)?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(max: usize) -> ReportBatchBuilder {
        ReportBatchBuilder::new(max, BatchFraming::Lines)
    }

    #[test]
    fn test_counts_track_inserted_reports() {
        let mut b = builder(10);
        b.add_report(Report::new("a", 2, 1));
        b.add_report(Report::new("b", 3, 0));
        b.add_report(Report::new("c", 0, 4));

        assert_eq!(b.reports_count(), 3);
        assert_eq!(b.wifis(), 5);
        assert_eq!(b.cells(), 5);
    }

    #[test]
    fn test_max_reports_reached() {
        let mut b = builder(2);
        b.add_report(Report::new("a", 0, 0));
        assert!(!b.max_reports_reached());
        b.add_report(Report::new("b", 0, 0));
        assert!(b.max_reports_reached());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut b = builder(10);
        b.add_report(Report::new("a", 2, 1));
        b.clear();
        assert!(b.is_empty());
        assert_eq!(b.wifis(), 0);
        assert_eq!(b.cells(), 0);
    }

    #[test]
    fn test_line_framing() {
        let mut b = builder(10);
        b.add_report(Report::new("{\"a\":1}", 0, 0));
        b.add_report(Report::new("{\"b\":2}", 0, 0));
        assert_eq!(b.finalize_reports(), "{\"a\":1}\n{\"b\":2}\n");
    }

    #[test]
    fn test_json_items_framing() {
        let mut b = ReportBatchBuilder::new(10, BatchFraming::JsonItems);
        b.add_report(Report::new("{\"a\":1}", 0, 0));
        b.add_report(Report::new("{\"b\":2}", 0, 0));
        let text = b.finalize_reports();
        assert_eq!(text, "{\"items\":[{\"a\":1},{\"b\":2}]}");

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["items"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_encode_is_gzip_and_decodes() {
        let mut b = builder(10);
        b.add_report(Report::new("hello", 1, 1));
        let bytes = b.encode().unwrap();

        // gzip magic
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
        assert_eq!(decode_batch(&bytes).unwrap(), "hello\n");
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode_batch(b"definitely not gzip").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_counts_saturate() {
        let mut b = builder(10);
        b.add_report(Report::new("a", u32::MAX, 0));
        b.add_report(Report::new("b", 1, 0));
        assert_eq!(b.wifis(), u32::MAX);
    }
}
