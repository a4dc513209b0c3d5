//! PDFPromote Core - Document Publisher
//!
//! # The Publishing Rules
//! 1. Rendered Appearance Is Truth
//! 2. Unchanged Documents Keep Their Timestamp
//! 3. Absent Baselines Are Normal
//! 4. Render Failures Are Loud
//! 5. Declared Order Is Display Order
//! 6. Nothing Is Written Until Everything Is Decided

pub mod config;
pub mod descriptors;
pub mod diff;
pub mod hashing;
pub mod ledger;
pub mod logging;
pub mod pipeline;
pub mod promotion;
pub mod raster;
pub mod rows;
pub mod source;

pub use config::{ConfigError, PublishConfig};
pub use descriptors::{ArtifactDescriptor, ArtifactStatus, DescriptorSet};
pub use diff::{BaselineArtifact, ComparisonVerdict, RasterDiffEngine, VerdictReason};
pub use hashing::{checksum_bytes, checksum_file, checksum_reader, read_with_checksum};
pub use ledger::{fetch_baseline, Baseline, BaselineOrigin, Ledger, LedgerEntry};
pub use pipeline::{PipelineError, PublishPipeline, PublishPlan, RunReport};
pub use promotion::{decide_promotion, Promotion};
pub use raster::{GhostscriptRasterizer, RasterPage, Rasterizer, RenderError, ScratchSpace};
pub use rows::{splice_between_markers, RowRecord};
pub use source::{DirectorySource, FetchOutcome, HttpSource, PublishedSource, SourceLocator};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// RMSE tolerance on an 8-bit-per-channel scale.
pub const DEFAULT_RMSE_THRESHOLD: f64 = 1.0;
