use crate::accept::NegotiationCache;
use crate::codec::BrotliParams;
use crate::config::{Algorithms, CacheBackend, CompressionConfig};
use crate::service::{CompressionService, Shared};
use http::request::Parts;
use std::fmt;
use std::sync::Arc;
use tower::Layer;

/// A Tower layer that compresses HTTP response bodies.
///
/// The layer negotiates a content encoding against the client's
/// `Accept-Encoding` header, honoring quality factors with ties broken by
/// the server's configured priority order, then compresses either the whole
/// buffered body or the live chunk stream.
///
/// All configuration is applied through the builder methods; the defaults
/// match a conventional web deployment (textual content types, 500-byte
/// minimum, `zstd > br > gzip > deflate`).
#[derive(Clone)]
pub struct CompressionLayer {
    config: CompressionConfig,
    memo: NegotiationCache,
}

impl CompressionLayer {
    /// Creates a new compression layer with default settings.
    pub fn new() -> Self {
        Self {
            config: CompressionConfig::default(),
            memo: NegotiationCache::new(),
        }
    }

    /// Sets the minimum known body size required for compression.
    ///
    /// Responses whose length is unknown (streams) are not subject to this
    /// threshold.
    pub fn min_size(mut self, size: usize) -> Self {
        self.config.min_size = size;
        self
    }

    /// Replaces the set of compressible content types.
    ///
    /// Values are matched against the content-type essence, ignoring
    /// parameters such as `charset`, case-insensitively.
    pub fn mimetypes<I, T>(mut self, mimetypes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.config.mimetypes = mimetypes
            .into_iter()
            .map(|mimetype| mimetype.into().to_ascii_lowercase())
            .collect();
        self
    }

    /// Sets the algorithm priority order for buffered responses.
    ///
    /// Accepts a sequence of [`crate::Algorithm`] or a comma-separated
    /// string such as `"zstd, br, gzip"`.
    pub fn algorithms(mut self, algorithms: impl Into<Algorithms>) -> Self {
        self.config.algorithms = algorithms.into().into_vec();
        self
    }

    /// Sets the algorithm priority order for streamed responses.
    pub fn streaming_algorithms(mut self, algorithms: impl Into<Algorithms>) -> Self {
        self.config.streaming_algorithms = algorithms.into().into_vec();
        self
    }

    /// Sets the gzip compression level.
    pub fn gzip_level(mut self, level: u32) -> Self {
        self.config.codec.gzip.level = level;
        self
    }

    /// Sets the deflate compression level.
    pub fn deflate_level(mut self, level: u32) -> Self {
        self.config.codec.deflate.level = level;
        self
    }

    /// Sets the brotli encoder parameters.
    pub fn brotli_params(mut self, params: BrotliParams) -> Self {
        self.config.codec.brotli = params;
        self
    }

    /// Sets the zstandard compression level.
    pub fn zstd_level(mut self, level: i32) -> Self {
        self.config.codec.zstd.level = level;
        self
    }

    /// Enables or disables compression of streamed responses.
    pub fn compress_streams(mut self, enabled: bool) -> Self {
        self.config.compress_streams = enabled;
        self
    }

    /// Enables or disables conditional-request evaluation
    /// (`If-None-Match` / `If-Modified-Since`).
    pub fn evaluate_conditional(mut self, enabled: bool) -> Self {
        self.config.evaluate_conditional = enabled;
        self
    }

    /// Also evaluates conditional requests for streamed responses.
    ///
    /// Off by default: a matching validator short-circuits the stream before
    /// it is ever pulled.
    pub fn streaming_conditional(mut self, enabled: bool) -> Self {
        self.config.streaming_conditional = enabled;
        self
    }

    /// Installs a compressed-body cache for the buffered path.
    ///
    /// `key_fn` derives the resource part of the cache key from the request;
    /// the negotiated algorithm is always prepended, so representations
    /// never mix across encodings.
    pub fn cache<F>(mut self, backend: Arc<dyn CacheBackend>, key_fn: F) -> Self
    where
        F: Fn(&Parts) -> String + Send + Sync + 'static,
    {
        self.config.cache = Some(backend);
        self.config.cache_key = Some(Arc::new(key_fn));
        self
    }
}

impl Default for CompressionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompressionLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressionLayer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(
            inner,
            Arc::new(Shared {
                config: self.config.clone(),
                // Clones share the memo, so every service stamped out by
                // this layer negotiates through the same bounded cache.
                memo: self.memo.clone(),
            }),
        )
    }
}
