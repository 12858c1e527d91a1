//! Core domain model for deal scanning: sources, cursors, ingested records and their history.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// External origin of ingestible deals. Selects the fetcher and the per-item schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    /// Competitor marketplace, scraped HTML listing.
    Dealpulse,
    /// Competitor marketplace, scraped HTML listing.
    Citybuys,
    /// Partner sales platform, JSON API.
    Partner,
}

impl Source {
    /// Fixed sweep order: small/fast sources first.
    pub const SWEEP_ORDER: [Source; 3] = [Source::Dealpulse, Source::Citybuys, Source::Partner];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Dealpulse => "dealpulse",
            Source::Citybuys => "citybuys",
            Source::Partner => "partner",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Source::Dealpulse => "DealPulse",
            Source::Citybuys => "CityBuys",
            Source::Partner => "Partner platform",
        }
    }

    pub fn is_competitor(&self) -> bool {
        matches!(self, Source::Dealpulse | Source::Citybuys)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown source `{0}`")]
pub struct ParseSourceError(pub String);

impl FromStr for Source {
    type Err = ParseSourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dealpulse" => Ok(Source::Dealpulse),
            "citybuys" => Ok(Source::Citybuys),
            "partner" => Ok(Source::Partner),
            other => Err(ParseSourceError(other.to_string())),
        }
    }
}

/// Offset into a source's item list. Only ever produced by [`Cursor::START`] or
/// by [`Cursor::advance`] on the chunk that was just processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(u64);

impl Cursor {
    pub const START: Cursor = Cursor(0);

    pub fn new(offset: u64) -> Self {
        Self(offset)
    }

    pub fn offset(&self) -> u64 {
        self.0
    }

    /// Cursor of the chunk after `[self, self + chunk_size)`, or `None` when
    /// that chunk reached the end of the source.
    pub fn advance(self, chunk_size: u64, total_available: u64) -> Option<Cursor> {
        let end = self.0.saturating_add(chunk_size);
        (end < total_available).then_some(Cursor(end))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a scan resumes: carried in continuation requests, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPosition {
    pub source: Source,
    pub cursor: Cursor,
}

impl ScanPosition {
    pub fn start_of(source: Source) -> Self {
        Self {
            source,
            cursor: Cursor::START,
        }
    }
}

/// Tracked business metrics. Compared with exact equality.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealMetrics {
    pub quantity_sold: i64,
    pub net_revenue: f64,
    pub margin: f64,
    pub price: f64,
}

impl DealMetrics {
    pub fn has_sales(&self) -> bool {
        self.quantity_sold != 0
    }

    /// Names of the metrics whose values differ between `self` and `other`.
    pub fn changed_fields(&self, other: &DealMetrics) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.quantity_sold != other.quantity_sold {
            changed.push("quantity_sold");
        }
        if self.net_revenue != other.net_revenue {
            changed.push("net_revenue");
        }
        if self.margin != other.margin {
            changed.push("margin");
        }
        if self.price != other.price {
            changed.push("price");
        }
        changed
    }
}

/// Canonical shape of one fetched item. Identity is `(source, external_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestedRecord {
    pub source: Source,
    pub external_id: String,
    pub name: String,
    pub metrics: DealMetrics,
    pub url: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
}

/// Persisted record with bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub record: IngestedRecord,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metrics of a record as they were just before a change was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: Uuid,
    pub record_id: Uuid,
    pub metrics: DealMetrics,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertResult {
    pub outcome: UpsertOutcome,
    pub id: Uuid,
}

/// Result of one chunk invocation. Consumed by the orchestrator, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanChunkResult {
    pub source: Source,
    pub cursor: Cursor,
    pub items_processed: u64,
    pub items_with_sales_count: u64,
    pub new_records: u64,
    pub updated_records: u64,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub total_available: u64,
    pub is_source_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Cursor>,
}

impl ScanChunkResult {
    pub fn unchanged_records(&self) -> u64 {
        let valid = self.items_processed.saturating_sub(self.errors.len() as u64);
        valid.saturating_sub(self.new_records + self.updated_records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_advance_stops_at_total() {
        let k = 3;
        let total = 7;
        let first = Cursor::START.advance(k, total);
        assert_eq!(first, Some(Cursor::new(3)));
        let second = first.unwrap().advance(k, total);
        assert_eq!(second, Some(Cursor::new(6)));
        assert_eq!(second.unwrap().advance(k, total), None);
    }

    #[test]
    fn cursor_advance_on_exact_multiple_completes() {
        assert_eq!(Cursor::new(3).advance(3, 6), None);
        assert_eq!(Cursor::START.advance(5, 0), None);
    }

    #[test]
    fn source_round_trips_through_str() {
        for source in Source::SWEEP_ORDER {
            assert_eq!(source.as_str().parse::<Source>().unwrap(), source);
        }
        assert_eq!(" Partner ".parse::<Source>().unwrap(), Source::Partner);
        assert!("groupon".parse::<Source>().is_err());
    }

    #[test]
    fn changed_fields_reports_any_drift() {
        let before = DealMetrics {
            quantity_sold: 10,
            net_revenue: 100.0,
            margin: 0.2,
            price: 10.0,
        };
        let mut after = before;
        assert!(before.changed_fields(&after).is_empty());
        after.net_revenue = 100.000_001;
        after.quantity_sold = 11;
        assert_eq!(before.changed_fields(&after), vec!["quantity_sold", "net_revenue"]);
    }

    #[test]
    fn chunk_result_serializes_camel_case_without_empty_next_cursor() {
        let result = ScanChunkResult {
            source: Source::Citybuys,
            cursor: Cursor::new(6),
            items_processed: 1,
            items_with_sales_count: 1,
            new_records: 1,
            updated_records: 0,
            errors: vec![],
            duration_ms: 4,
            total_available: 7,
            is_source_complete: true,
            next_cursor: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["source"], "citybuys");
        assert_eq!(json["isSourceComplete"], true);
        assert_eq!(json["cursor"], 6);
        assert!(json.get("nextCursor").is_none());
    }
}
