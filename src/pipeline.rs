//! Publishing Pipeline - Single Entry Point
//!
//! Runs in two phases. `plan` fetches the baseline once and decides every
//! artifact in declared order without touching the publish location.
//! `commit` writes artifacts, ledger and topic only when every artifact
//! was decided, or, with `publish.allow_partial`, when every undecided
//! artifact can keep its published version.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::config::PublishConfig;
use crate::descriptors::{ArtifactDescriptor, ArtifactStatus, DescriptorError, DescriptorSet};
use crate::diff::{BaselineArtifact, ComparisonVerdict, RasterDiffEngine};
use crate::hashing::read_file_with_checksum;
use crate::ledger::{
    fetch_baseline, write_atomic, write_ledger, Baseline, BaselineOrigin, Ledger, LedgerError,
};
use crate::promotion::{decide_promotion, Promotion};
use crate::raster::{Rasterizer, ScratchSpace};
use crate::rows::{splice_between_markers, RowRecord, SpliceError};
use crate::source::{FetchOutcome, PublishedSource};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Topic splice failed: {0}")]
    Splice(#[from] SpliceError),

    #[error("Failed to prepare scratch space: {0}")]
    Scratch(#[source] io::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} artifact(s) failed: {}", .0.len(), failure_ids(.0))]
    ArtifactsFailed(Vec<ArtifactFailure>),
}

fn failure_ids(failures: &[ArtifactFailure]) -> String {
    failures.iter().map(|f| f.id.as_str()).collect::<Vec<_>>().join(", ")
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> PipelineError + '_ {
    move |source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ReadArtifact,
    Scratch,
    Render,
    Promotion,
}

/// An artifact that could not be decided. Other artifacts are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactFailure {
    pub id: String,
    pub kind: FailureKind,
    pub message: String,
    /// Its published version was kept in the plan in its place.
    pub carried_forward: bool,
}

impl ArtifactFailure {
    fn new(id: &str, kind: FailureKind, message: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            kind,
            message: message.to_string(),
            carried_forward: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactDecision {
    pub id: String,
    pub status: ArtifactStatus,
    pub artifact_filename: String,
    pub promotion: Promotion,
}

impl ArtifactDecision {
    pub fn row(&self) -> RowRecord {
        RowRecord::new(
            &self.id,
            self.status,
            self.promotion.entry.last_modified,
            &self.promotion.entry.checksum,
            &self.artifact_filename,
        )
    }
}

/// Every decision of one run, in descriptor order.
#[derive(Debug, Clone)]
pub struct PublishPlan {
    pub run_id: Uuid,
    pub baseline_origin: BaselineOrigin,
    pub decisions: Vec<ArtifactDecision>,
    pub failures: Vec<ArtifactFailure>,
}

impl PublishPlan {
    /// Every descriptor id has a decision.
    pub fn is_complete(&self) -> bool {
        self.failures.iter().all(|f| f.carried_forward)
    }

    /// Failures with nothing to publish in their place.
    pub fn blocking_failures(&self) -> Vec<ArtifactFailure> {
        self.failures.iter().filter(|f| !f.carried_forward).cloned().collect()
    }

    /// Ledger holding exactly the decided ids, nothing carried over from a
    /// stale baseline.
    pub fn new_ledger(&self) -> Ledger {
        let mut ledger = Ledger::new();
        for decision in &self.decisions {
            ledger.insert(decision.id.clone(), decision.promotion.entry.clone());
        }
        ledger
    }

    pub fn rows(&self) -> Vec<RowRecord> {
        self.decisions.iter().map(ArtifactDecision::row).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactOutcome {
    pub id: String,
    pub verdict: ComparisonVerdict,
    pub checksum: String,
    pub last_modified: DateTime<Utc>,
    pub published_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub baseline: BaselineOrigin,
    pub artifacts: Vec<ArtifactOutcome>,
    pub rows: Vec<RowRecord>,
    /// Artifacts that failed and were published unchanged from the baseline.
    pub carried_forward: Vec<ArtifactFailure>,
    pub ledger_path: PathBuf,
    pub topic_path: Option<PathBuf>,
}

impl RunReport {
    pub fn modified_count(&self) -> usize {
        self.artifacts.iter().filter(|a| a.verdict.is_modified).count()
    }
}

/// The publishing pipeline - single entry point for a release run
pub struct PublishPipeline<S: PublishedSource, R: Rasterizer> {
    config: PublishConfig,
    source: S,
    engine: RasterDiffEngine<R>,
}

impl<S: PublishedSource, R: Rasterizer> PublishPipeline<S, R> {
    pub fn new(config: PublishConfig, source: S, rasterizer: R) -> Self {
        let engine = RasterDiffEngine::with_threshold(rasterizer, config.raster.rmse_threshold);
        Self {
            config,
            source,
            engine,
        }
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    pub fn fetch_baseline(&self) -> Baseline {
        fetch_baseline(&self.source, &self.config.source.ledger_name)
    }

    /// Decide every artifact. Nothing under the publish location changes.
    pub fn plan(&self, descriptors: &DescriptorSet) -> Result<PublishPlan, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("plan", %run_id);
        let _guard = span.enter();

        let baseline = self.fetch_baseline();
        let scratch = ScratchSpace::new(self.config.raster.scratch_parent.as_deref())
            .map_err(PipelineError::Scratch)?;

        let mut decisions = Vec::with_capacity(descriptors.len());
        let mut failures = vec![];

        for descriptor in descriptors.iter() {
            match self.decide(descriptor, &baseline, &scratch) {
                Ok(decision) => decisions.push(decision),
                Err(mut failure) => {
                    tracing::error!(
                        id = %failure.id,
                        kind = ?failure.kind,
                        message = %failure.message,
                        "artifact failed"
                    );
                    if self.config.publish.allow_partial {
                        if let Some(kept) = self.carry_forward(descriptor, &baseline) {
                            tracing::warn!(id = %failure.id, "keeping published version");
                            failure.carried_forward = true;
                            decisions.push(kept);
                        }
                    }
                    failures.push(failure);
                }
            }
        }

        Ok(PublishPlan {
            run_id,
            baseline_origin: baseline.origin,
            decisions,
            failures,
        })
    }

    fn decide(
        &self,
        descriptor: &ArtifactDescriptor,
        baseline: &Baseline,
        scratch: &ScratchSpace,
    ) -> Result<ArtifactDecision, ArtifactFailure> {
        let id = descriptor.id.as_str();
        let fail = |kind: FailureKind, message: String| ArtifactFailure::new(id, kind, message);

        let filename = descriptor
            .artifact_filename()
            .map_err(|e| fail(FailureKind::ReadArtifact, e.to_string()))?;
        let artifact_path = descriptor.artifact_path();
        let (new_bytes, checksum) = read_file_with_checksum(&artifact_path).map_err(|e| {
            fail(FailureKind::ReadArtifact, format!("{}: {e}", artifact_path.display()))
        })?;

        let baseline_entry = baseline.ledger.get(id);
        let baseline_artifact = match baseline_entry {
            None => {
                tracing::info!(%id, "no baseline entry, first publication");
                BaselineArtifact::Missing
            }
            Some(_) => match self.source.fetch(&filename) {
                FetchOutcome::Found(bytes) => BaselineArtifact::Available(bytes),
                FetchOutcome::NotFound => {
                    tracing::info!(
                        %id,
                        %filename,
                        "baseline entry exists but artifact is not published"
                    );
                    BaselineArtifact::Unavailable
                }
                FetchOutcome::Unreachable(reason) => {
                    tracing::warn!(%id, %filename, %reason, "baseline artifact unreachable");
                    BaselineArtifact::Unavailable
                }
            },
        };

        let artifact_scratch = scratch
            .for_artifact(id)
            .map_err(|e| fail(FailureKind::Scratch, e.to_string()))?;
        let verdict = self
            .engine
            .compare(&baseline_artifact, &new_bytes, &artifact_scratch)
            .map_err(|e| fail(FailureKind::Render, e.to_string()))?;
        drop(artifact_scratch);

        tracing::info!(%id, modified = verdict.is_modified, reason = ?verdict.reason, "verdict");

        let baseline_bytes = match baseline_artifact {
            BaselineArtifact::Available(bytes) => Some(bytes),
            _ => None,
        };
        let promotion = decide_promotion(
            verdict,
            new_bytes,
            checksum,
            baseline_bytes,
            baseline_entry,
            Utc::now(),
        )
        .map_err(|e| fail(FailureKind::Promotion, e.to_string()))?;

        Ok(ArtifactDecision {
            id: id.to_string(),
            status: descriptor.status,
            artifact_filename: filename,
            promotion,
        })
    }

    /// Decision that republishes the baseline of an artifact that failed.
    ///
    /// Needs both its ledger entry and its published bytes.
    fn carry_forward(
        &self,
        descriptor: &ArtifactDescriptor,
        baseline: &Baseline,
    ) -> Option<ArtifactDecision> {
        let entry = baseline.ledger.get(&descriptor.id)?;
        let filename = descriptor.artifact_filename().ok()?;
        let bytes = match self.source.fetch(&filename) {
            FetchOutcome::Found(bytes) => bytes,
            FetchOutcome::NotFound | FetchOutcome::Unreachable(_) => return None,
        };
        Some(ArtifactDecision {
            id: descriptor.id.clone(),
            status: descriptor.status,
            artifact_filename: filename,
            promotion: Promotion {
                verdict: ComparisonVerdict::kept(),
                entry: entry.clone(),
                bytes,
            },
        })
    }

    /// Write a complete plan to the publish location.
    ///
    /// A plan with undecided artifacts is refused whole; a half-published
    /// release is worse than none.
    pub fn commit(&self, plan: PublishPlan) -> Result<RunReport, PipelineError> {
        if !plan.is_complete() {
            return Err(PipelineError::ArtifactsFailed(plan.blocking_failures()));
        }

        let span = tracing::info_span!("commit", run_id = %plan.run_id);
        let _guard = span.enter();

        let resources_dir = &self.config.publish.resources_dir;
        let rows = plan.rows();
        let ledger = plan.new_ledger();

        // Splice first so a bad topic fails before anything is published.
        let topic = if self.config.topic.enabled {
            let topic = &self.config.topic;
            let document = fs::read_to_string(&topic.path).map_err(io_error(&topic.path))?;
            let markup: Vec<String> = rows.iter().map(RowRecord::to_table_row).collect();
            let spliced = splice_between_markers(
                &document,
                &topic.start_marker,
                &topic.end_marker,
                &markup,
            )?;
            Some((topic.path.clone(), spliced))
        } else {
            None
        };

        fs::create_dir_all(resources_dir).map_err(io_error(resources_dir))?;
        for placeholder in &self.config.publish.placeholders {
            let path = resources_dir.join(placeholder);
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "placeholder removed"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&path)(e)),
            }
        }

        let mut artifacts = Vec::with_capacity(plan.decisions.len());
        for decision in &plan.decisions {
            let path = resources_dir.join(&decision.artifact_filename);
            write_atomic(&path, &decision.promotion.bytes).map_err(io_error(&path))?;
            artifacts.push(ArtifactOutcome {
                id: decision.id.clone(),
                verdict: decision.promotion.verdict,
                checksum: decision.promotion.entry.checksum.clone(),
                last_modified: decision.promotion.entry.last_modified,
                published_path: path,
            });
        }

        let ledger_path = resources_dir.join(&self.config.source.ledger_name);
        write_ledger(&ledger_path, &ledger)?;

        let topic_path = match topic {
            Some((path, content)) => {
                write_atomic(&path, content.as_bytes()).map_err(io_error(&path))?;
                tracing::info!(path = %path.display(), rows = rows.len(), "topic updated");
                Some(path)
            }
            None => None,
        };

        let report = RunReport {
            run_id: plan.run_id,
            baseline: plan.baseline_origin,
            artifacts,
            rows,
            carried_forward: plan.failures,
            ledger_path,
            topic_path,
        };
        tracing::info!(
            artifacts = report.artifacts.len(),
            modified = report.modified_count(),
            carried_forward = report.carried_forward.len(),
            "release committed"
        );
        Ok(report)
    }

    pub fn run(&self, descriptors: &DescriptorSet) -> Result<RunReport, PipelineError> {
        let plan = self.plan(descriptors)?;
        self.commit(plan)
    }
}
