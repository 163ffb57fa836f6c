//! Range partitioning of the modification-time domain
//!
//! A [`DownloadRange`] is half-open on modification time and strictly
//! greater-than on document ID. [`RangePartitioner`] splits a domain into
//! contiguous ranges whose last member is unbounded, so documents modified
//! after the scan begins are still picked up.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound used for the open-ended last range
pub const UNBOUNDED: i64 = i64::MAX;

/// Last document a worker successfully handed downstream
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Modification time of the document (seconds)
    pub modified: i64,
    /// Document ID
    pub id: String,
}

/// A unit of download work
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct DownloadRange {
    from_modified: i64,
    to_modified: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_after_id: Option<String>,
}

#[derive(Deserialize)]
struct RawRange {
    from_modified: i64,
    to_modified: i64,
    #[serde(default)]
    start_after_id: Option<String>,
}

impl TryFrom<RawRange> for DownloadRange {
    type Error = Error;

    fn try_from(raw: RawRange) -> Result<Self> {
        DownloadRange::new(raw.from_modified, raw.to_modified, raw.start_after_id)
    }
}

impl DownloadRange {
    /// Create a range; fails with [`Error::InvalidRange`] when `to < from`
    pub fn new(from_modified: i64, to_modified: i64, start_after_id: Option<String>) -> Result<Self> {
        if to_modified < from_modified {
            return Err(Error::InvalidRange {
                from: from_modified,
                to: to_modified,
            });
        }
        Ok(Self {
            from_modified,
            to_modified,
            start_after_id,
        })
    }

    /// `[from, +∞)`
    pub fn unbounded_from(from_modified: i64) -> Self {
        Self {
            from_modified,
            to_modified: UNBOUNDED,
            start_after_id: None,
        }
    }

    /// Inclusive lower bound
    pub fn from_modified(&self) -> i64 {
        self.from_modified
    }

    /// Exclusive upper bound ([`UNBOUNDED`] for the last range)
    pub fn to_modified(&self) -> i64 {
        self.to_modified
    }

    /// Only documents with a strictly greater ID are in range
    pub fn start_after_id(&self) -> Option<&str> {
        self.start_after_id.as_deref()
    }

    /// Whether the upper bound is open
    pub fn is_unbounded(&self) -> bool {
        self.to_modified == UNBOUNDED
    }

    /// Whether a document falls inside this range
    pub fn contains(&self, modified: i64, id: &str) -> bool {
        let in_time = modified >= self.from_modified
            && (self.is_unbounded() || modified < self.to_modified);
        let after = self
            .start_after_id
            .as_deref()
            .is_none_or(|start| id > start);
        in_time && after
    }

    /// Whether the time interval is empty (`from == to`)
    pub fn is_empty_interval(&self) -> bool {
        !self.is_unbounded() && self.from_modified == self.to_modified
    }

    /// The remaining portion of this range after `checkpoint`
    ///
    /// Scans are ID-ordered, so only the ID bound moves; the time bounds are
    /// kept as issued. Moving `from_modified` up to the checkpoint's time would
    /// drop documents with an older modification time and a larger ID.
    pub fn resume_from(&self, checkpoint: &Checkpoint) -> DownloadRange {
        let start_after_id = match self.start_after_id.as_deref() {
            Some(current) if current >= checkpoint.id.as_str() => current.to_string(),
            _ => checkpoint.id.clone(),
        };
        DownloadRange {
            from_modified: self.from_modified,
            to_modified: self.to_modified,
            start_after_id: Some(start_after_id),
        }
    }
}

impl std::fmt::Display for DownloadRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, ", self.from_modified)?;
        if self.is_unbounded() {
            write!(f, "+inf)")?;
        } else {
            write!(f, "{})", self.to_modified)?;
        }
        if let Some(id) = &self.start_after_id {
            write!(f, " after {id}")?;
        }
        Ok(())
    }
}

/// Splits the modification-time domain into contiguous ranges
#[derive(Clone, Copy, Debug)]
pub struct RangePartitioner {
    parallelism: usize,
}

impl RangePartitioner {
    /// Create a partitioner targeting `parallelism` ranges (at least 1)
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }

    /// Split `[domain_start, domain_end)` into at most `parallelism` contiguous ranges.
    ///
    /// The last range is unbounded. A domain narrower than `parallelism`
    /// seconds yields one range per second; an empty domain yields the single
    /// range `[domain_start, +∞)`.
    pub fn split(&self, domain_start: i64, domain_end: i64) -> Result<Vec<DownloadRange>> {
        if domain_end < domain_start {
            return Err(Error::InvalidRange {
                from: domain_start,
                to: domain_end,
            });
        }

        let span = (domain_end as i128 - domain_start as i128) as u128;
        let count = (self.parallelism as u128).min(span).max(1);
        let width = span.div_ceil(count).max(1);

        let mut ranges = Vec::with_capacity(count as usize);
        let mut lower = domain_start as i128;
        for i in 0..count {
            if i + 1 == count {
                ranges.push(DownloadRange::unbounded_from(lower as i64));
                break;
            }
            let upper = (lower + width as i128).min(domain_end as i128);
            if upper >= domain_end as i128 {
                // ceil rounding used up the domain early
                ranges.push(DownloadRange::unbounded_from(lower as i64));
                break;
            }
            ranges.push(DownloadRange::new(lower as i64, upper as i64, None)?);
            lower = upper;
        }

        tracing::debug!(
            domain_start,
            domain_end,
            parallelism = self.parallelism,
            ranges = ranges.len(),
            "Partitioned modification-time domain"
        );
        Ok(ranges)
    }

    /// Split `[domain_start, now)` using the wall clock in seconds
    pub fn split_until_now(&self, domain_start: i64) -> Result<Vec<DownloadRange>> {
        let now = chrono::Utc::now().timestamp();
        self.split(domain_start, now.max(domain_start))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(ranges: &[DownloadRange], start: i64, end: i64) {
        assert!(!ranges.is_empty());
        assert_eq!(ranges[0].from_modified(), start);
        for pair in ranges.windows(2) {
            assert_eq!(
                pair[0].to_modified(),
                pair[1].from_modified(),
                "ranges must be contiguous: {} then {}",
                pair[0],
                pair[1]
            );
            assert!(pair[0].from_modified() < pair[0].to_modified(), "no empty ranges");
        }
        let (last, rest) = ranges.split_last().unwrap();
        assert!(last.is_unbounded(), "last range must be unbounded");
        assert!(rest.iter().all(|r| !r.is_unbounded()), "only the last is unbounded");
        assert!(last.from_modified() <= end.max(start));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let err = DownloadRange::new(10, 5, None).unwrap_err();
        assert!(matches!(err, Error::InvalidRange { from: 10, to: 5 }));
    }

    #[test]
    fn equal_bounds_are_allowed() {
        let r = DownloadRange::new(5, 5, None).unwrap();
        assert!(r.is_empty_interval());
        assert!(!r.contains(5, "x"));
    }

    #[test]
    fn split_covers_domain_for_many_shapes() {
        for (start, end) in [(0, 0), (0, 1), (0, 7), (0, 100), (17, 1_000), (-50, 50), (0, 1_700_000_000)] {
            for p in 1..=12 {
                let ranges = RangePartitioner::new(p).split(start, end).unwrap();
                assert!(ranges.len() <= p, "at most {p} ranges, got {}", ranges.len());
                assert_covers(&ranges, start, end);

                // every second of the domain lands in exactly one range
                if end - start <= 1_000 {
                    for t in start..end {
                        let hits = ranges.iter().filter(|r| r.contains(t, "id")).count();
                        assert_eq!(hits, 1, "t={t} start={start} end={end} p={p}");
                    }
                }
            }
        }
    }

    #[test]
    fn split_uses_full_parallelism_on_wide_domains() {
        let ranges = RangePartitioner::new(4).split(0, 1_000).unwrap();
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0].to_modified(), 250);
        assert_eq!(ranges[3].from_modified(), 750);
    }

    #[test]
    fn small_domain_yields_fewer_ranges() {
        let ranges = RangePartitioner::new(8).split(100, 103).unwrap();
        assert_eq!(ranges.len(), 3);
    }

    #[test]
    fn empty_domain_yields_single_unbounded_range() {
        let ranges = RangePartitioner::new(4).split(42, 42).unwrap();
        assert_eq!(ranges, vec![DownloadRange::unbounded_from(42)]);
    }

    #[test]
    fn inverted_domain_is_rejected() {
        assert!(matches!(
            RangePartitioner::new(2).split(10, 0),
            Err(Error::InvalidRange { .. })
        ));
    }

    #[test]
    fn zero_parallelism_is_clamped() {
        let ranges = RangePartitioner::new(0).split(0, 10).unwrap();
        assert_eq!(ranges.len(), 1);
        assert!(ranges[0].is_unbounded());
    }

    #[test]
    fn unbounded_range_admits_future_documents() {
        let r = DownloadRange::unbounded_from(100);
        assert!(r.contains(i64::MAX - 1, "x"));
        assert!(!r.contains(99, "x"));
    }

    #[test]
    fn resume_moves_id_bound_and_keeps_time_bounds() {
        let r = DownloadRange::new(10, 20, None).unwrap();
        let cp = Checkpoint {
            modified: 15,
            id: "2:/a/m".to_string(),
        };
        let resumed = r.resume_from(&cp);
        assert_eq!(resumed.from_modified(), 10);
        assert_eq!(resumed.to_modified(), 20);
        assert_eq!(resumed.start_after_id(), Some("2:/a/m"));

        // a document before the checkpoint (even with an older time) is excluded,
        // one after it (even with an older time) is included
        assert!(!resumed.contains(11, "2:/a/b"));
        assert!(resumed.contains(11, "2:/a/z"));
        assert!(!resumed.contains(15, "2:/a/m"));
    }

    #[test]
    fn resume_never_moves_backwards() {
        let r = DownloadRange::new(0, 10, Some("5".to_string())).unwrap();
        let stale = Checkpoint {
            modified: 1,
            id: "3".to_string(),
        };
        assert_eq!(r.resume_from(&stale).start_after_id(), Some("5"));
    }

    #[test]
    fn display_shows_open_bound() {
        assert_eq!(DownloadRange::unbounded_from(3).to_string(), "[3, +inf)");
        let r = DownloadRange::new(1, 2, Some("x".into())).unwrap();
        assert_eq!(r.to_string(), "[1, 2) after x");
    }

    #[test]
    fn deserialization_validates_bounds() {
        let ok: DownloadRange =
            serde_json::from_str(r#"{"from_modified":1,"to_modified":5}"#).unwrap();
        assert_eq!(ok, DownloadRange::new(1, 5, None).unwrap());

        let bad = serde_json::from_str::<DownloadRange>(r#"{"from_modified":9,"to_modified":5}"#);
        assert!(bad.is_err());
    }
}
