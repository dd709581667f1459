//! Line-oriented report ingestion.
//!
//! Each input line is one JSON object:
//!
//! ```text
//! {"report": {"timestamp": 1406863343313, "wifiAccessPoints": [...]}, "wifis": 12, "cells": 1}
//! {"report": "already serialized text", "wifis": 0, "cells": 2}
//! ```
//!
//! A `report` given as a JSON value is stored as its compact text.

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stumbler_store::ReportStore;
use stumbler_types::Report;

/// One input line.
#[derive(Debug, Deserialize)]
struct ReportLine {
    report: Value,
    #[serde(default)]
    wifis: u32,
    #[serde(default)]
    cells: u32,
}

/// Errors for a single input line.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Invalid report line: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Report payload is empty")]
    EmptyPayload,
}

/// Totals of an ingest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Lines inserted into the store.
    pub accepted: u64,
    /// Lines that could not be parsed.
    pub rejected: u64,
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Report>, IngestError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let parsed: ReportLine = serde_json::from_str(line)?;
    let payload = match parsed.report {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    };
    if payload.is_empty() {
        return Err(IngestError::EmptyPayload);
    }

    Ok(Some(Report::new(payload, parsed.wifis, parsed.cells)))
}

/// Insert every report read from `reader` until EOF or cancellation.
///
/// Lines that fail to parse are logged and skipped.
pub async fn ingest<R>(
    store: &ReportStore,
    reader: R,
    cancel: CancellationToken,
) -> std::io::Result<IngestSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut summary = IngestSummary::default();
    let mut line_no = 0u64;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Ingest cancelled");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("End of input");
            break;
        };
        line_no += 1;

        match parse_line(&line) {
            Ok(Some(report)) => {
                let store = store.clone();
                // insert may flush to disk
                tokio::task::spawn_blocking(move || store.insert(report))
                    .await
                    .map_err(std::io::Error::other)?;
                summary.accepted += 1;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Skipping line {}: {}", line_no, e);
                summary.rejected += 1;
            }
        }
    }

    info!(
        "Ingested {} report(s), rejected {}",
        summary.accepted, summary.rejected
    );
    Ok(summary)
}
