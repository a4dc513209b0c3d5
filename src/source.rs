//! Published Sources - Where the Previous Release Lives
//!
//! Fetching never fails: a missing document and an unreachable host are
//! both ordinary outcomes the caller decides on.

use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Found(Vec<u8>),
    /// The document has never been published.
    NotFound,
    /// Network error, timeout, or unexpected status.
    Unreachable(String),
}

/// Read-only access to previously published documents, by file name.
pub trait PublishedSource {
    fn fetch(&self, name: &str) -> FetchOutcome;
    fn describe(&self) -> String;
}

impl<S: PublishedSource + ?Sized> PublishedSource for Box<S> {
    fn fetch(&self, name: &str) -> FetchOutcome {
        (**self).fetch(name)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Where the publish site is: a URL prefix or a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    Http(String),
    Directory(PathBuf),
}

impl SourceLocator {
    pub fn parse(locator: &str) -> Self {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            Self::Http(locator.to_string())
        } else {
            Self::Directory(PathBuf::from(locator))
        }
    }

    pub fn open(&self, timeout: Duration) -> Result<Box<dyn PublishedSource>, SourceError> {
        Ok(match self {
            Self::Http(base) => Box::new(HttpSource::new(base, timeout)?),
            Self::Directory(root) => Box::new(DirectorySource::new(root.clone())),
        })
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(url) => write!(f, "{url}"),
            Self::Directory(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Invalid source URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

pub struct HttpSource {
    base: reqwest::Url,
    client: reqwest::blocking::Client,
}

impl HttpSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        // Url::join drops the last segment unless the base ends in a slash.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base = reqwest::Url::parse(&normalized).map_err(|e| SourceError::InvalidUrl {
            url: base_url.to_string(),
            message: e.to_string(),
        })?;
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(15).min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self { base, client })
    }
}

impl PublishedSource for HttpSource {
    fn fetch(&self, name: &str) -> FetchOutcome {
        let url = match self.base.join(name) {
            Ok(url) => url,
            Err(e) => {
                return FetchOutcome::Unreachable(format!("bad document name {name}: {e}"));
            }
        };
        tracing::debug!(%url, "fetching published document");

        let response = match self.client.get(url.clone()).send() {
            Ok(r) => r,
            Err(e) => return FetchOutcome::Unreachable(e.to_string()),
        };
        match response.status() {
            StatusCode::OK => match response.bytes() {
                Ok(body) => FetchOutcome::Found(body.to_vec()),
                Err(e) => FetchOutcome::Unreachable(format!("reading body of {url}: {e}")),
            },
            StatusCode::NOT_FOUND | StatusCode::GONE => FetchOutcome::NotFound,
            status => FetchOutcome::Unreachable(format!("{url} answered {status}")),
        }
    }

    fn describe(&self) -> String {
        self.base.to_string()
    }
}

/// A publish site mirrored on the local filesystem.
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PublishedSource for DirectorySource {
    fn fetch(&self, name: &str) -> FetchOutcome {
        let path = self.root.join(name);
        match fs::read(&path) {
            Ok(bytes) => FetchOutcome::Found(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => FetchOutcome::NotFound,
            Err(e) => FetchOutcome::Unreachable(format!("{}: {e}", path.display())),
        }
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}
