//! Raster Diff - Has the Rendered Appearance Changed?
//!
//! Checks run cheapest first: page count, then page dimensions, then
//! per-page RMSE. The first mismatch decides; later pages are not read.

use serde::{Deserialize, Serialize};

use crate::raster::{ArtifactScratch, RasterPage, Rasterizer, RenderError};
use crate::DEFAULT_RMSE_THRESHOLD;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    NoBaselineArtifact,
    NoBaselineBytes,
    PageCountMismatch,
    DimensionMismatch,
    RmseExceedsThreshold,
    WithinTolerance,
    /// Not compared: the artifact failed and its published version was kept.
    BaselineKept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonVerdict {
    pub is_modified: bool,
    pub reason: VerdictReason,
}

impl ComparisonVerdict {
    pub fn modified(reason: VerdictReason) -> Self {
        Self {
            is_modified: true,
            reason,
        }
    }

    pub fn unmodified() -> Self {
        Self {
            is_modified: false,
            reason: VerdictReason::WithinTolerance,
        }
    }

    pub fn kept() -> Self {
        Self {
            is_modified: false,
            reason: VerdictReason::BaselineKept,
        }
    }
}

/// What is known about the previously published artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaselineArtifact {
    /// No ledger entry: never published.
    Missing,
    /// Ledger entry exists but the bytes could not be retrieved.
    Unavailable,
    Available(Vec<u8>),
}

/// Root-mean-square error over every channel sample of two pages.
///
/// `None` when the pages differ in shape. A page with no pixels has an
/// error of zero against its equal.
pub fn rmse(old: &RasterPage, new: &RasterPage) -> Option<f64> {
    if !old.same_shape(new) {
        return None;
    }
    let (old, new) = (old.samples(), new.samples());
    if old.is_empty() {
        return Some(0.0);
    }
    let sum: f64 = old
        .iter()
        .zip(new)
        .map(|(&a, &b)| {
            let d = f64::from(a) - f64::from(b);
            d * d
        })
        .sum();
    Some((sum / old.len() as f64).sqrt())
}

fn shape(page: &RasterPage) -> String {
    format!("{}x{}x{}", page.width(), page.height(), page.channels())
}

/// Compare two rendered page sequences.
pub fn compare_pages(
    old: &[RasterPage],
    new: &[RasterPage],
    threshold: f64,
) -> ComparisonVerdict {
    if old.len() != new.len() {
        tracing::debug!(old_pages = old.len(), new_pages = new.len(), "page count differs");
        return ComparisonVerdict::modified(VerdictReason::PageCountMismatch);
    }

    for (index, (a, b)) in old.iter().zip(new).enumerate() {
        let page = index + 1;
        let Some(error) = rmse(a, b) else {
            tracing::debug!(page, old = %shape(a), new = %shape(b), "page dimensions differ");
            return ComparisonVerdict::modified(VerdictReason::DimensionMismatch);
        };
        tracing::debug!(page, rmse = error, "page compared");
        if error > threshold {
            return ComparisonVerdict::modified(VerdictReason::RmseExceedsThreshold);
        }
    }

    ComparisonVerdict::unmodified()
}

pub struct RasterDiffEngine<R: Rasterizer> {
    rasterizer: R,
    threshold: f64,
}

impl<R: Rasterizer> RasterDiffEngine<R> {
    pub fn new(rasterizer: R) -> Self {
        Self::with_threshold(rasterizer, DEFAULT_RMSE_THRESHOLD)
    }

    pub fn with_threshold(rasterizer: R, threshold: f64) -> Self {
        Self {
            rasterizer,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Decide whether `new` differs visually from the published baseline.
    ///
    /// Render failures on either side are returned as errors, never as a
    /// verdict.
    pub fn compare(
        &self,
        baseline: &BaselineArtifact,
        new: &[u8],
        scratch: &ArtifactScratch,
    ) -> Result<ComparisonVerdict, RenderError> {
        let old = match baseline {
            BaselineArtifact::Missing => {
                return Ok(ComparisonVerdict::modified(VerdictReason::NoBaselineArtifact))
            }
            BaselineArtifact::Unavailable => {
                return Ok(ComparisonVerdict::modified(VerdictReason::NoBaselineBytes))
            }
            BaselineArtifact::Available(bytes) => bytes,
        };

        let old_pages = self.rasterizer.render(old, &scratch.old_dir())?;
        let new_pages = self.rasterizer.render(new, &scratch.new_dir())?;
        Ok(compare_pages(&old_pages, &new_pages, self.threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(w: u32, h: u32, v: u8) -> RasterPage {
        RasterPage::solid(w, h, [v, v, v])
    }

    #[test]
    fn test_rmse_identical_is_zero() {
        assert_eq!(rmse(&page(4, 4, 200), &page(4, 4, 200)), Some(0.0));
    }

    #[test]
    fn test_rmse_uniform_offset() {
        let error = rmse(&page(4, 4, 10), &page(4, 4, 13)).unwrap();
        assert!((error - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_rmse_single_sample() {
        // One sample off by 12 in 48 samples: sqrt(144 / 48) = sqrt(3).
        let a = page(4, 4, 0);
        let mut samples = a.samples().to_vec();
        samples[5] = 12;
        let b = RasterPage::new(4, 4, 3, samples).unwrap();
        assert!((rmse(&a, &b).unwrap() - 3f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_rmse_refuses_mismatched_shapes() {
        // Same sample count, different layout: never compared sample-wise.
        let wide = page(4, 1, 0);
        let tall = page(1, 4, 0);
        assert_eq!(wide.samples().len(), tall.samples().len());
        assert_eq!(rmse(&wide, &tall), None);

        let rgba = RasterPage::new(2, 2, 4, vec![0; 16]).unwrap();
        assert_eq!(rmse(&page(2, 2, 0), &rgba), None);
    }

    #[test]
    fn test_rmse_empty_page_is_zero() {
        assert_eq!(rmse(&page(0, 3, 9), &page(0, 3, 200)), Some(0.0));
    }

    #[test]
    fn test_page_count_checked_before_dimensions() {
        let old = vec![page(10, 10, 0)];
        let new = vec![page(5, 5, 0), page(5, 5, 0)];
        let verdict = compare_pages(&old, &new, 1.0);
        assert_eq!(verdict, ComparisonVerdict::modified(VerdictReason::PageCountMismatch));
    }

    #[test]
    fn test_dimension_mismatch_stops_scan() {
        // The second pair differs far beyond tolerance, but is never reached.
        let old = vec![page(2, 2, 0), page(5, 5, 0)];
        let new = vec![page(2, 3, 0), page(5, 5, 255)];
        assert_eq!(compare_pages(&old, &new, 1.0).reason, VerdictReason::DimensionMismatch);
    }

    #[test]
    fn test_rmse_over_threshold_stops_scan() {
        let old = vec![page(2, 2, 0), page(2, 2, 0)];
        let new = vec![page(2, 2, 0), page(2, 2, 2)];
        assert_eq!(
            compare_pages(&old, &new, 1.0),
            ComparisonVerdict::modified(VerdictReason::RmseExceedsThreshold)
        );
    }

    #[test]
    fn test_threshold_is_strict() {
        // RMSE exactly 1.0 is still within tolerance.
        let old = vec![page(3, 3, 50)];
        let new = vec![page(3, 3, 51)];
        assert_eq!(compare_pages(&old, &new, 1.0), ComparisonVerdict::unmodified());
    }

    #[test]
    fn test_identical_pages_unmodified() {
        let pages = vec![page(8, 8, 1), page(8, 8, 2), page(8, 8, 3)];
        assert_eq!(compare_pages(&pages, &pages.clone(), 1.0), ComparisonVerdict::unmodified());
    }

    #[test]
    fn test_empty_sequences_unmodified() {
        assert_eq!(compare_pages(&[], &[], 1.0), ComparisonVerdict::unmodified());
    }

    struct FailingRasterizer;

    impl Rasterizer for FailingRasterizer {
        fn render(&self, _: &[u8], _: &std::path::Path) -> Result<Vec<RasterPage>, RenderError> {
            Err(RenderError::NoPages)
        }
    }

    #[test]
    fn test_engine_no_baseline_skips_rendering() {
        let scratch = crate::raster::ScratchSpace::new(None).unwrap();
        let artifact = scratch.for_artifact("A").unwrap();
        let engine = RasterDiffEngine::new(FailingRasterizer);

        let missing = engine.compare(&BaselineArtifact::Missing, b"new", &artifact).unwrap();
        assert_eq!(missing, ComparisonVerdict::modified(VerdictReason::NoBaselineArtifact));

        let unavailable =
            engine.compare(&BaselineArtifact::Unavailable, b"new", &artifact).unwrap();
        assert_eq!(unavailable, ComparisonVerdict::modified(VerdictReason::NoBaselineBytes));
    }

    #[test]
    fn test_engine_render_failure_is_error() {
        let scratch = crate::raster::ScratchSpace::new(None).unwrap();
        let artifact = scratch.for_artifact("A").unwrap();
        let engine = RasterDiffEngine::new(FailingRasterizer);
        let baseline = BaselineArtifact::Available(b"old".to_vec());
        let result = engine.compare(&baseline, b"new", &artifact);
        assert!(matches!(result, Err(RenderError::NoPages)));
    }
}
