use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use http::request::Parts;
use tracing::warn;

use crate::codec::{Algorithm, CodecParams};

/// Default minimum body size, in bytes, for compression.
pub const DEFAULT_MIN_SIZE: usize = 500;

/// Content types compressed by default: textual formats, structured data,
/// fonts, and the text-based image types.
pub const DEFAULT_MIMETYPES: &[&str] = &[
    "text/html",
    "text/css",
    "text/plain",
    "text/xml",
    "text/x-component",
    "text/javascript",
    "application/x-javascript",
    "application/javascript",
    "application/json",
    "application/manifest+json",
    "application/vnd.api+json",
    "application/xml",
    "application/xhtml+xml",
    "application/rss+xml",
    "application/atom+xml",
    "application/vnd.ms-fontobject",
    "application/x-font-ttf",
    "application/x-font-opentype",
    "application/x-font-truetype",
    "image/svg+xml",
    "image/x-icon",
    "image/vnd.microsoft.icon",
    "font/ttf",
    "font/eot",
    "font/otf",
    "font/opentype",
];

/// Derives the external cache key from the request head.
pub type CacheKeyFn = Arc<dyn Fn(&Parts) -> String + Send + Sync>;

/// A key→bytes store for compressed response bodies.
///
/// `get` and `set` are treated as atomic point operations; concurrent misses
/// for the same key may compute the same value twice, and the last write
/// wins. A failing backend should behave as if the entry were absent, which
/// degrades to direct compression.
pub trait CacheBackend: Send + Sync {
    /// Returns the bytes stored under `key`, if any.
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    /// Stores `value` under `key`.
    fn set(&self, key: &str, value: Vec<u8>);
}

/// An unbounded in-process [`CacheBackend`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: Vec<u8>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_owned(), value);
        }
    }
}

/// An ordered algorithm priority list.
///
/// Converts from a slice or vec of [`Algorithm`], or from a comma-separated
/// string such as `"zstd, br, gzip"`; both forms normalize to the same
/// ordered sequence. Unknown tokens in a string are dropped with a warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Algorithms(Vec<Algorithm>);

impl Algorithms {
    pub(crate) fn into_vec(self) -> Vec<Algorithm> {
        self.0
    }

    /// Returns the algorithms in priority order.
    pub fn as_slice(&self) -> &[Algorithm] {
        &self.0
    }
}

impl From<Vec<Algorithm>> for Algorithms {
    fn from(algorithms: Vec<Algorithm>) -> Self {
        Self(algorithms)
    }
}

impl From<&[Algorithm]> for Algorithms {
    fn from(algorithms: &[Algorithm]) -> Self {
        Self(algorithms.to_vec())
    }
}

impl<const N: usize> From<[Algorithm; N]> for Algorithms {
    fn from(algorithms: [Algorithm; N]) -> Self {
        Self(algorithms.to_vec())
    }
}

impl From<&str> for Algorithms {
    fn from(list: &str) -> Self {
        let mut algorithms = Vec::new();
        for token in list.split(',') {
            let token = token.trim().to_ascii_lowercase();
            if token.is_empty() {
                continue;
            }
            match Algorithm::from_token(&token) {
                Some(algorithm) => {
                    if !algorithms.contains(&algorithm) {
                        algorithms.push(algorithm);
                    }
                }
                None => warn!(%token, "ignoring unknown compression algorithm"),
            }
        }
        Self(algorithms)
    }
}

/// Resolved middleware configuration.
#[derive(Clone)]
pub(crate) struct CompressionConfig {
    /// Lowercased content-type essences eligible for compression.
    pub(crate) mimetypes: HashSet<String>,
    pub(crate) codec: CodecParams,
    pub(crate) min_size: usize,
    /// Priority order for buffered responses.
    pub(crate) algorithms: Vec<Algorithm>,
    /// Priority order for streamed responses.
    pub(crate) streaming_algorithms: Vec<Algorithm>,
    pub(crate) compress_streams: bool,
    pub(crate) evaluate_conditional: bool,
    /// Evaluate conditional requests on streamed responses too.
    pub(crate) streaming_conditional: bool,
    pub(crate) cache: Option<Arc<dyn CacheBackend>>,
    pub(crate) cache_key: Option<CacheKeyFn>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            mimetypes: DEFAULT_MIMETYPES.iter().map(|m| (*m).to_owned()).collect(),
            codec: CodecParams::default(),
            min_size: DEFAULT_MIN_SIZE,
            algorithms: vec![
                Algorithm::Zstd,
                Algorithm::Brotli,
                Algorithm::Gzip,
                Algorithm::Deflate,
            ],
            // no gzip for streams
            streaming_algorithms: vec![Algorithm::Zstd, Algorithm::Brotli, Algorithm::Deflate],
            compress_streams: true,
            evaluate_conditional: true,
            streaming_conditional: false,
            cache: None,
            cache_key: None,
        }
    }
}

impl fmt::Debug for CompressionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressionConfig")
            .field("mimetypes", &self.mimetypes.len())
            .field("codec", &self.codec)
            .field("min_size", &self.min_size)
            .field("algorithms", &self.algorithms)
            .field("streaming_algorithms", &self.streaming_algorithms)
            .field("compress_streams", &self.compress_streams)
            .field("evaluate_conditional", &self.evaluate_conditional)
            .field("streaming_conditional", &self.streaming_conditional)
            .field("cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}
