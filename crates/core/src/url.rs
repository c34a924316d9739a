//! Virtual file urls
//!
//! The model never stores raw url strings. A `VirtualFileUrl` is a sequence
//! of interned segments produced by a `VirtualFileUrlManager`, which owns
//! canonicalization. Equal segments share one allocation, so large models
//! with deep directory trees stay compact.
//!
//! # Design Notes
//!
//! The default manager splits `scheme://` off as the first segment and the
//! remainder on `/`. Empty segments are kept so reconstruction is lossless.

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::fmt;
use std::sync::Arc;

const SCHEME_SEPARATOR: &str = "://";

/// Url stored as interned segments
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualFileUrl {
    segments: Arc<[Arc<str>]>,
}

impl VirtualFileUrl {
    /// Build from already canonical segments
    ///
    /// Prefer [`VirtualFileUrlManager::from_segments`] so segments are interned.
    pub fn from_parts(segments: Vec<Arc<str>>) -> Self {
        VirtualFileUrl {
            segments: segments.into(),
        }
    }

    /// Segment sequence
    pub fn segments(&self) -> &[Arc<str>] {
        &self.segments
    }

    /// Last segment, usually the file name
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_ref())
    }

    /// Reassemble the url string
    pub fn to_url_string(&self) -> String {
        let mut out = String::new();
        let mut rest = self.segments.iter();
        if let Some(first) = self.segments.first() {
            if first.ends_with(SCHEME_SEPARATOR) {
                out.push_str(first);
                rest.next();
                let tail: Vec<&str> = rest.map(|s| s.as_ref()).collect();
                out.push_str(&tail.join("/"));
                return out;
            }
        }
        let all: Vec<&str> = rest.map(|s| s.as_ref()).collect();
        all.join("/")
    }
}

impl fmt::Debug for VirtualFileUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualFileUrl({})", self.to_url_string())
    }
}

impl fmt::Display for VirtualFileUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url_string())
    }
}

/// Collaborator that decomposes and reconstructs urls
pub trait VirtualFileUrlManager: Send + Sync {
    /// Canonicalize a raw url string
    fn from_url(&self, url: &str) -> VirtualFileUrl;

    /// Build a url from segments (used when restoring from a cache)
    fn from_segments(&self, segments: &[&str]) -> VirtualFileUrl;

    /// Reconstruct the url string
    fn url(&self, url: &VirtualFileUrl) -> String {
        url.to_url_string()
    }

    /// Parent directory url, if any
    fn parent(&self, url: &VirtualFileUrl) -> Option<VirtualFileUrl> {
        let segments = url.segments();
        if segments.len() <= 1 {
            return None;
        }
        Some(VirtualFileUrl::from_parts(
            segments[..segments.len() - 1].to_vec(),
        ))
    }
}

/// Default manager interning every segment it sees
#[derive(Default)]
pub struct InterningUrlManager {
    interned: Mutex<FxHashSet<Arc<str>>>,
}

impl InterningUrlManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct segments interned so far
    pub fn interned_count(&self) -> usize {
        self.interned.lock().len()
    }

    fn intern(&self, segment: &str) -> Arc<str> {
        let mut interned = self.interned.lock();
        if let Some(existing) = interned.get(segment) {
            return Arc::clone(existing);
        }
        let segment: Arc<str> = Arc::from(segment);
        interned.insert(Arc::clone(&segment));
        segment
    }
}

impl fmt::Debug for InterningUrlManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterningUrlManager")
            .field("interned", &self.interned_count())
            .finish()
    }
}

impl VirtualFileUrlManager for InterningUrlManager {
    fn from_url(&self, url: &str) -> VirtualFileUrl {
        let mut segments = Vec::new();
        let rest = match url.find(SCHEME_SEPARATOR) {
            Some(pos) => {
                let (scheme, rest) = url.split_at(pos + SCHEME_SEPARATOR.len());
                segments.push(self.intern(scheme));
                rest
            }
            None => url,
        };
        segments.extend(rest.split('/').map(|s| self.intern(s)));
        VirtualFileUrl::from_parts(segments)
    }

    fn from_segments(&self, segments: &[&str]) -> VirtualFileUrl {
        VirtualFileUrl::from_parts(segments.iter().map(|s| self.intern(s)).collect())
    }
}
