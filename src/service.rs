use crate::accept::NegotiationCache;
use crate::body::CompressionBody;
use crate::config::CompressionConfig;
use crate::future::{RequestContext, ResponseFuture};
use http::{Request, Response, header};
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// State shared between a service, its clones, and its in-flight futures.
pub(crate) struct Shared {
    pub(crate) config: CompressionConfig,
    pub(crate) memo: NegotiationCache,
}

/// A Tower service that compresses HTTP response bodies.
#[derive(Clone)]
pub struct CompressionService<S> {
    inner: S,
    shared: Arc<Shared>,
}

impl<S> CompressionService<S> {
    pub(crate) fn new(inner: S, shared: Arc<Shared>) -> Self {
        Self { inner, shared }
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: fmt::Debug> fmt::Debug for CompressionService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressionService")
            .field("inner", &self.inner)
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CompressionService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: http_body::Body,
    ResBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = Response<CompressionBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let (parts, body) = req.into_parts();

        // Everything the response side needs is captured now; the request is
        // gone by the time the response comes back.
        let cache_key = match (&self.shared.config.cache, &self.shared.config.cache_key) {
            (Some(_), Some(key_fn)) => Some(key_fn(&parts)),
            _ => None,
        };
        let context = RequestContext {
            accept_encoding: parts
                .headers
                .get(header::ACCEPT_ENCODING)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("")
                .to_owned(),
            method: parts.method.clone(),
            if_none_match: parts.headers.get(header::IF_NONE_MATCH).cloned(),
            if_modified_since: parts.headers.get(header::IF_MODIFIED_SINCE).cloned(),
            cache_key,
        };

        let future = self.inner.call(Request::from_parts(parts, body));
        ResponseFuture::new(future, Arc::clone(&self.shared), context)
    }
}
