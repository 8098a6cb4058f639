use crate::body::CompressionBody;
use crate::codec::{self, Algorithm, StreamEncoder};
use crate::conditional;
use crate::config::CompressionConfig;
use crate::service::Shared;
use bytes::{Buf, Bytes, BytesMut};
use http::response::Parts;
use http::{HeaderMap, HeaderValue, Method, Response, StatusCode, header};
use http_body::Body;
use pin_project_lite::pin_project;
use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, warn};

/// Facts captured from the request before it is handed to the inner service.
pub(crate) struct RequestContext {
    /// Raw `Accept-Encoding` value; empty when the header was absent.
    pub(crate) accept_encoding: String,
    pub(crate) method: Method,
    pub(crate) if_none_match: Option<HeaderValue>,
    pub(crate) if_modified_since: Option<HeaderValue>,
    /// External cache key, when a cache and key function are configured.
    pub(crate) cache_key: Option<String>,
}

pin_project! {
    /// Future for compression service responses.
    pub struct ResponseFuture<F, B> {
        #[pin]
        state: State<F, B>,
        shared: Arc<Shared>,
        context: RequestContext,
    }
}

pin_project! {
    #[project = StateProj]
    enum State<F, B> {
        /// Waiting for the inner service.
        Inner {
            #[pin]
            future: F,
        },
        /// Buffering the inner body for one-shot compression.
        Collecting {
            parts: Option<Parts>,
            algorithm: Algorithm,
            #[pin]
            body: B,
            buffer: BytesMut,
            trailers: Option<HeaderMap>,
        },
        Done,
    }
}

impl<F, B> ResponseFuture<F, B> {
    pub(crate) fn new(future: F, shared: Arc<Shared>, context: RequestContext) -> Self {
        Self {
            state: State::Inner { future },
            shared,
            context,
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Output = Result<Response<CompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();
        loop {
            match this.state.as_mut().project() {
                StateProj::Inner { future } => {
                    let response = match future.poll(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(error)) => {
                            this.state.set(State::Done);
                            return Poll::Ready(Err(error));
                        }
                        Poll::Ready(Ok(response)) => response,
                    };
                    match begin(response, this.shared, this.context) {
                        Step::Finished(response) => {
                            this.state.set(State::Done);
                            return Poll::Ready(Ok(response));
                        }
                        Step::Collect {
                            parts,
                            algorithm,
                            body,
                        } => {
                            this.state.set(State::Collecting {
                                parts: Some(parts),
                                algorithm,
                                body,
                                buffer: BytesMut::new(),
                                trailers: None,
                            });
                        }
                    }
                }

                StateProj::Collecting {
                    parts,
                    algorithm,
                    mut body,
                    buffer,
                    trailers,
                } => loop {
                    match body.as_mut().poll_frame(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                            Ok(mut data) => {
                                while data.has_remaining() {
                                    let chunk = data.chunk();
                                    buffer.extend_from_slice(chunk);
                                    let advanced = chunk.len();
                                    data.advance(advanced);
                                }
                            }
                            Err(frame) => {
                                if let Ok(received) = frame.into_trailers() {
                                    *trailers = Some(received);
                                }
                            }
                        },
                        Poll::Ready(Some(Err(error))) => {
                            let Some(parts) = parts.take() else {
                                unreachable!("collect state resumed after completion");
                            };
                            let body = CompressionBody::failed(io::Error::other(error.into()));
                            this.state.set(State::Done);
                            return Poll::Ready(Ok(Response::from_parts(parts, body)));
                        }
                        Poll::Ready(None) => {
                            let Some(parts) = parts.take() else {
                                unreachable!("collect state resumed after completion");
                            };
                            let data = mem::take(buffer).freeze();
                            let trailers = trailers.take();
                            let algorithm = *algorithm;
                            let response = finish_buffered(
                                parts,
                                data,
                                trailers,
                                algorithm,
                                this.shared,
                                this.context,
                            );
                            this.state.set(State::Done);
                            return Poll::Ready(Ok(response));
                        }
                    }
                },

                StateProj::Done => panic!("ResponseFuture polled after completion"),
            }
        }
    }
}

/// Outcome of the eligibility and dispatch pass over a fresh response.
enum Step<B> {
    Finished(Response<CompressionBody<B>>),
    Collect {
        parts: Parts,
        algorithm: Algorithm,
        body: B,
    },
}

fn begin<B>(response: Response<B>, shared: &Shared, context: &RequestContext) -> Step<B>
where
    B: Body,
{
    let (mut parts, body) = response.into_parts();
    ensure_vary_accept_encoding(&mut parts.headers);

    let config = &shared.config;
    let streamed = body.size_hint().exact().is_none();
    let streaming_compressed = streamed && config.compress_streams;
    let enabled = if streaming_compressed {
        &config.streaming_algorithms
    } else {
        &config.algorithms
    };

    let Some(algorithm) = shared.memo.choose(enabled, &context.accept_encoding) else {
        debug!("no compression algorithm negotiated");
        return Step::Finished(Response::from_parts(parts, CompressionBody::passthrough(body)));
    };

    if let Some(reason) = skip_reason(&parts, &body, streamed, config) {
        debug!(reason, "response passed through uncompressed");
        return Step::Finished(Response::from_parts(parts, CompressionBody::passthrough(body)));
    }

    if streaming_compressed {
        let encoder = match StreamEncoder::new(algorithm, &config.codec) {
            Ok(encoder) => encoder,
            Err(error) => {
                warn!(%error, algorithm = algorithm.token(), "failed to create streaming encoder");
                return Step::Finished(Response::from_parts(
                    parts,
                    CompressionBody::passthrough(body),
                ));
            }
        };

        parts.headers.insert(
            header::CONTENT_ENCODING,
            HeaderValue::from_static(algorithm.token()),
        );
        // Compressed size is unknown up front.
        parts.headers.remove(header::CONTENT_LENGTH);
        parts.headers.remove(header::ACCEPT_RANGES);
        conditional::rewrite_etag(&mut parts.headers, algorithm);

        if config.evaluate_conditional
            && config.streaming_conditional
            && is_read_method(&context.method)
            && conditional::is_not_modified(context, &parts.headers)
        {
            return Step::Finished(not_modified(parts));
        }

        return Step::Finished(Response::from_parts(
            parts,
            CompressionBody::compressed(body, encoder),
        ));
    }

    Step::Collect {
        parts,
        algorithm,
        body,
    }
}

/// Returns why the response must stay uncompressed, or `None` when it is
/// eligible.
fn skip_reason<B: Body>(
    parts: &Parts,
    body: &B,
    streamed: bool,
    config: &CompressionConfig,
) -> Option<&'static str> {
    if !mimetype_allowed(&parts.headers, &config.mimetypes) {
        return Some("content type not in the allow set");
    }
    if !parts.status.is_success() {
        return Some("status outside the success range");
    }
    if streamed && !config.compress_streams {
        return Some("streaming compression disabled");
    }
    if parts.headers.contains_key(header::CONTENT_ENCODING) {
        return Some("response already encoded");
    }
    if let Some(length) = known_length(&parts.headers, body) {
        if length < config.min_size as u64 {
            return Some("body below the minimum size");
        }
    }
    None
}

fn finish_buffered<B>(
    mut parts: Parts,
    data: Bytes,
    trailers: Option<HeaderMap>,
    algorithm: Algorithm,
    shared: &Shared,
    context: &RequestContext,
) -> Response<CompressionBody<B>> {
    let config = &shared.config;

    let compressed = match cached_compress(&data, algorithm, config, context) {
        Ok(compressed) => compressed,
        Err(error) => {
            warn!(%error, algorithm = algorithm.token(), "compression failed, sending identity");
            set_content_length(&mut parts.headers, data.len());
            return Response::from_parts(parts, CompressionBody::complete(data, trailers));
        }
    };

    parts.headers.insert(
        header::CONTENT_ENCODING,
        HeaderValue::from_static(algorithm.token()),
    );
    set_content_length(&mut parts.headers, compressed.len());
    parts.headers.remove(header::ACCEPT_RANGES);
    conditional::rewrite_etag(&mut parts.headers, algorithm);

    if config.evaluate_conditional
        && is_read_method(&context.method)
        && conditional::is_not_modified(context, &parts.headers)
    {
        return not_modified(parts);
    }

    Response::from_parts(parts, CompressionBody::complete(Bytes::from(compressed), trailers))
}

/// Compresses `data`, going through the configured cache when one is present.
///
/// The cache key is partitioned by algorithm: an entry stored for one
/// encoding must never be served for another.
fn cached_compress(
    data: &Bytes,
    algorithm: Algorithm,
    config: &CompressionConfig,
    context: &RequestContext,
) -> io::Result<Vec<u8>> {
    if let (Some(cache), Some(key)) = (config.cache.as_deref(), context.cache_key.as_deref()) {
        let cache_key = format!("{};{}", algorithm.token(), key);
        if let Some(stored) = cache.get(&cache_key) {
            debug!(key = %cache_key, "compression cache hit");
            return Ok(stored);
        }
        let compressed = codec::compress(data, algorithm, &config.codec)?;
        debug!(key = %cache_key, size = compressed.len(), "compression cache store");
        cache.set(&cache_key, compressed.clone());
        return Ok(compressed);
    }
    codec::compress(data, algorithm, &config.codec)
}

fn not_modified<B>(mut parts: Parts) -> Response<CompressionBody<B>> {
    parts.status = StatusCode::NOT_MODIFIED;
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, CompressionBody::empty())
}

/// Makes sure `Vary` covers `Accept-Encoding`, appending rather than
/// overwriting; an existing entry (or `*`) is left as is.
fn ensure_vary_accept_encoding(headers: &mut HeaderMap) {
    for vary in headers.get_all(header::VARY) {
        if let Ok(value) = vary.to_str() {
            let covered = value.split(',').any(|entry| {
                let entry = entry.trim();
                entry == "*" || entry.eq_ignore_ascii_case("accept-encoding")
            });
            if covered {
                return;
            }
        }
    }
    headers.append(header::VARY, HeaderValue::from_static("accept-encoding"));
}

fn mimetype_allowed(headers: &HeaderMap, allowed: &HashSet<String>) -> bool {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    allowed.contains(&essence)
}

/// Known body length: the `Content-Length` header, else the body's exact
/// size hint. Streamed bodies have neither, which never disqualifies them
/// on size grounds.
fn known_length<B: Body>(headers: &HeaderMap, body: &B) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .or_else(|| body.size_hint().exact())
}

fn set_content_length(headers: &mut HeaderMap, length: usize) {
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
}

fn is_read_method(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}
