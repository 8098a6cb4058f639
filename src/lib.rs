//! Negotiating HTTP response compression middleware for Tower.
//!
//! This crate provides a Tower layer that compresses HTTP response bodies
//! with Zstd, Brotli, Gzip, or Deflate, chosen by weighing the client's
//! `Accept-Encoding` quality factors against the server's configured
//! priority order. Buffered bodies are compressed in one shot, optionally
//! through a pluggable result cache; streamed bodies are compressed
//! incrementally, chunk by chunk.
//!
//! # Example
//!
//! ```ignore
//! use tower_compress::CompressionLayer;
//! use tower::ServiceBuilder;
//!
//! let service = ServiceBuilder::new()
//!     .layer(CompressionLayer::new().min_size(1024))
//!     .service(my_service);
//! ```
//!
//! To compress only selected routes, skip the global `ServiceBuilder` and
//! apply the layer to those routes' services directly.
//!
//! # Compression Rules
//!
//! The middleware will **not** compress responses when:
//! - Negotiation yields no algorithm (no supported token, or the client
//!   asked for `identity`)
//! - `Content-Type` is not in the configured allow set
//! - The status code is outside the 2xx success range
//! - `Content-Encoding` is already set
//! - The body is a stream and streaming compression is disabled
//! - The known body length is below the minimum size threshold
//!   (default: 500 bytes; an unknown length never disqualifies)
//!
//! # Response Modifications
//!
//! Every response gets `Accept-Encoding` folded into `Vary`. When
//! compression is applied:
//! - `Content-Encoding` names the negotiated algorithm
//! - `Content-Length` is recomputed (buffered) or removed (streamed)
//! - `Accept-Ranges` is removed
//! - A strong `ETag` is rewritten to include the algorithm
//! - For `GET`/`HEAD`, `If-None-Match` and `If-Modified-Since` are
//!   evaluated against the finished response and may convert it to
//!   `304 Not Modified`

#![deny(missing_docs)]

mod accept;
mod body;
mod codec;
mod conditional;
mod config;
mod future;
mod layer;
mod service;

pub use body::CompressionBody;
pub use codec::{
    Algorithm, BrotliMode, BrotliParams, CodecParams, DeflateParams, GzipParams, ZstdParams,
    decompress,
};
pub use config::{
    Algorithms, CacheBackend, CacheKeyFn, DEFAULT_MIMETYPES, DEFAULT_MIN_SIZE, MemoryCache,
};
pub use future::ResponseFuture;
pub use layer::CompressionLayer;
pub use service::CompressionService;
