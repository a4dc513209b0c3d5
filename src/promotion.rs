//! Promotion - Which Bytes and Which Metadata Get Published

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;

use crate::diff::{ComparisonVerdict, VerdictReason};
use crate::ledger::LedgerEntry;

/// The bytes and ledger entry chosen for one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Promotion {
    pub verdict: ComparisonVerdict,
    pub entry: LedgerEntry,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum PromotionError {
    #[error("Verdict {0:?} keeps the baseline but no baseline entry was given")]
    MissingBaselineEntry(VerdictReason),

    #[error("Verdict {0:?} keeps the baseline but no baseline bytes were given")]
    MissingBaselineBytes(VerdictReason),
}

/// Select the artifact to publish.
///
/// Modified: the new bytes, their fresh checksum, and `now` truncated to
/// whole seconds. Unmodified: the baseline bytes and the baseline entry
/// verbatim, so the timestamp of an unchanged document never moves.
pub fn decide_promotion(
    verdict: ComparisonVerdict,
    new_bytes: Vec<u8>,
    new_checksum: String,
    baseline_bytes: Option<Vec<u8>>,
    baseline_entry: Option<&LedgerEntry>,
    now: DateTime<Utc>,
) -> Result<Promotion, PromotionError> {
    if verdict.is_modified {
        return Ok(Promotion {
            verdict,
            entry: LedgerEntry {
                checksum: new_checksum,
                last_modified: now.trunc_subsecs(0),
            },
            bytes: new_bytes,
        });
    }

    let entry = baseline_entry
        .cloned()
        .ok_or(PromotionError::MissingBaselineEntry(verdict.reason))?;
    let bytes = baseline_bytes.ok_or(PromotionError::MissingBaselineBytes(verdict.reason))?;
    Ok(Promotion {
        verdict,
        entry,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn baseline() -> LedgerEntry {
        LedgerEntry {
            checksum: "abc".into(),
            last_modified: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_modified_keeps_new() {
        let second = Utc.with_ymd_and_hms(2026, 5, 6, 7, 8, 9).unwrap();
        let now = second + chrono::Duration::milliseconds(750);
        let p = decide_promotion(
            ComparisonVerdict::modified(VerdictReason::RmseExceedsThreshold),
            b"new".to_vec(),
            "fresh".into(),
            Some(b"old".to_vec()),
            Some(&baseline()),
            now,
        )
        .unwrap();
        assert_eq!(p.bytes, b"new");
        assert_eq!(p.entry.checksum, "fresh");
        assert_eq!(p.entry.last_modified, second);
    }

    #[test]
    fn test_unmodified_keeps_baseline_verbatim() {
        let p = decide_promotion(
            ComparisonVerdict::unmodified(),
            b"new".to_vec(),
            "fresh".into(),
            Some(b"old".to_vec()),
            Some(&baseline()),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(p.bytes, b"old");
        assert_eq!(p.entry, baseline());
    }

    #[test]
    fn test_unmodified_without_baseline_is_error() {
        let result = decide_promotion(
            ComparisonVerdict::unmodified(),
            b"new".to_vec(),
            "fresh".into(),
            None,
            Some(&baseline()),
            Utc::now(),
        );
        assert!(matches!(result, Err(PromotionError::MissingBaselineBytes(_))));
    }
}
