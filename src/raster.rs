//! Rasterization - Documents to Comparable Pixel Pages
//!
//! Every page is decoded to 8-bit RGB at a fixed resolution so two
//! renders of the same document produce directly comparable samples.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use crate::hashing::scratch_key;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to launch rasterizer {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Rasterizer exited with {status}: {stderr}")]
    Rasterizer { status: String, stderr: String },

    #[error("Rasterizer produced no pages")]
    NoPages,

    #[error("Failed to decode page {page}: {message}")]
    Decode { page: PathBuf, message: String },

    #[error("Page buffer holds {actual} samples, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("Scratch I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One rendered page. Samples are row-major, `channels` per pixel.
///
/// The sample buffer always holds exactly `width * height * channels`
/// values; both constructors enforce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterPage {
    width: u32,
    height: u32,
    channels: u8,
    samples: Vec<u8>,
}

impl RasterPage {
    pub fn new(
        width: u32,
        height: u32,
        channels: u8,
        samples: Vec<u8>,
    ) -> Result<Self, RenderError> {
        let expected = width as usize * height as usize * channels as usize;
        if samples.len() != expected {
            return Err(RenderError::BufferSize {
                expected,
                actual: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            samples,
        })
    }

    /// A page filled with one RGB colour.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let samples = rgb.iter().copied().cycle().take(pixels * 3).collect();
        Self {
            width,
            height,
            channels: 3,
            samples,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    /// Equal shapes imply equally long sample buffers.
    pub fn same_shape(&self, other: &RasterPage) -> bool {
        self.width == other.width && self.height == other.height && self.channels == other.channels
    }
}

/// Renders a paged document into one raster page per document page.
///
/// `workdir` is an empty directory the implementation may use freely;
/// the caller removes it afterwards.
pub trait Rasterizer {
    fn render(&self, document: &[u8], workdir: &Path) -> Result<Vec<RasterPage>, RenderError>;
}

impl<R: Rasterizer + ?Sized> Rasterizer for Box<R> {
    fn render(&self, document: &[u8], workdir: &Path) -> Result<Vec<RasterPage>, RenderError> {
        (**self).render(document, workdir)
    }
}

impl<R: Rasterizer + ?Sized> Rasterizer for &R {
    fn render(&self, document: &[u8], workdir: &Path) -> Result<Vec<RasterPage>, RenderError> {
        (**self).render(document, workdir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GhostscriptRasterizer {
    pub program: String,
    pub device: String,
    pub resolution_dpi: u32,
}

impl Default for GhostscriptRasterizer {
    fn default() -> Self {
        Self {
            program: "gs".to_string(),
            device: "png16m".to_string(),
            resolution_dpi: 72,
        }
    }
}

impl GhostscriptRasterizer {
    fn command(&self, input: &Path, pages_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-q")
            .arg("-dBATCH")
            .arg("-dNOPAUSE")
            .arg("-dSAFER")
            .arg(format!("-sDEVICE={}", self.device))
            .arg(format!("-r{}", self.resolution_dpi))
            .arg(format!("-sOutputFile={}", pages_dir.join("page_%05d.png").display()))
            .arg(input);
        cmd
    }
}

impl Rasterizer for GhostscriptRasterizer {
    fn render(&self, document: &[u8], workdir: &Path) -> Result<Vec<RasterPage>, RenderError> {
        let input = workdir.join("document.pdf");
        let pages_dir = workdir.join("pages");
        fs::write(&input, document)?;
        fs::create_dir_all(&pages_dir)?;

        let output = self
            .command(&input, &pages_dir)
            .output()
            .map_err(|source| RenderError::Launch {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RenderError::Rasterizer {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&pages_dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<_, _>>()?;
        files.retain(|p| p.extension().map_or(false, |e| e == "png"));
        files.sort();

        if files.is_empty() {
            return Err(RenderError::NoPages);
        }

        files.iter().map(|path| decode_page(path)).collect()
    }
}

fn decode_page(path: &Path) -> Result<RasterPage, RenderError> {
    let image = image::open(path).map_err(|e| RenderError::Decode {
        page: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    RasterPage::new(width, height, 3, rgb.into_raw())
}

/// Per-run scratch area. Removed when dropped.
pub struct ScratchSpace {
    root: tempfile::TempDir,
}

impl ScratchSpace {
    pub fn new(parent: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pdfpromote-");
        let root = match parent {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)?
            }
            None => builder.tempdir()?,
        };
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Fresh directory for one artifact, keyed by its id.
    ///
    /// Anything left from an earlier attempt under the same key is
    /// cleared first.
    pub fn for_artifact(&self, id: &str) -> io::Result<ArtifactScratch> {
        let dir = self.root.path().join(scratch_key(id));
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(dir.join("old"))?;
        fs::create_dir_all(dir.join("new"))?;
        Ok(ArtifactScratch { dir })
    }
}

/// Scratch directory of a single artifact. Removed when dropped, on
/// every exit path.
#[derive(Debug)]
pub struct ArtifactScratch {
    dir: PathBuf,
}

impl ArtifactScratch {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn old_dir(&self) -> PathBuf {
        self.dir.join("old")
    }

    pub fn new_dir(&self) -> PathBuf {
        self.dir.join("new")
    }
}

impl Drop for ArtifactScratch {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    dir = %self.dir.display(),
                    error = %e,
                    "failed to clean scratch directory"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_buffer_checked() {
        assert!(RasterPage::new(2, 2, 3, vec![0; 12]).is_ok());
        assert!(matches!(
            RasterPage::new(2, 2, 3, vec![0; 11]),
            Err(RenderError::BufferSize {
                expected: 12,
                actual: 11,
            })
        ));
    }

    #[test]
    fn test_solid_page() {
        let page = RasterPage::solid(2, 1, [1, 2, 3]);
        assert_eq!(page.samples(), &[1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_equal_shapes_have_equal_buffers() {
        let a = RasterPage::new(3, 2, 4, vec![9; 24]).unwrap();
        let b = RasterPage::solid(3, 2, [0, 0, 0]);
        assert!(!a.same_shape(&b));
        assert_eq!(a.samples().len(), 24);
        assert_eq!(b.samples().len(), 18);
        assert_eq!((a.width(), a.height(), a.channels()), (3, 2, 4));
    }

    #[test]
    fn test_scratch_scoped_by_id_and_cleaned() {
        let scratch = ScratchSpace::new(None).unwrap();
        let a = scratch.for_artifact("A").unwrap();
        let b = scratch.for_artifact("B").unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.old_dir().is_dir());
        assert!(a.new_dir().is_dir());

        let a_path = a.path().to_path_buf();
        drop(a);
        assert!(!a_path.exists());
        assert!(b.path().exists());
    }

    #[test]
    fn test_scratch_reusable_for_same_id() {
        let parent = tempfile::tempdir().unwrap();
        let scratch = ScratchSpace::new(Some(parent.path())).unwrap();
        let first = scratch.for_artifact("A").unwrap();
        fs::write(first.new_dir().join("leftover.png"), b"x").unwrap();
        let first_path = first.path().to_path_buf();
        std::mem::forget(first);

        let second = scratch.for_artifact("A").unwrap();
        assert_eq!(second.path(), first_path);
        assert!(!second.new_dir().join("leftover.png").exists());
    }

    #[test]
    fn test_scratch_space_removed_on_drop() {
        let scratch = ScratchSpace::new(None).unwrap();
        let root = scratch.path().to_path_buf();
        drop(scratch);
        assert!(!root.exists());
    }

    #[test]
    fn test_missing_program_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let gs = GhostscriptRasterizer {
            program: "definitely-not-a-rasterizer-binary".into(),
            ..Default::default()
        };
        let result = gs.render(b"%PDF-1.4", dir.path());
        assert!(matches!(result, Err(RenderError::Launch { .. })));
    }

    #[test]
    fn test_decode_png_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page_00001.png");
        let img = image::RgbImage::from_pixel(3, 2, image::Rgb([10, 20, 30]));
        img.save(&path).unwrap();

        let page = decode_page(&path).unwrap();
        assert_eq!((page.width(), page.height(), page.channels()), (3, 2, 3));
        assert_eq!(&page.samples()[..3], &[10, 20, 30]);
    }
}
