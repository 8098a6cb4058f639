use crate::codec::StreamEncoder;
use bytes::{Buf, Bytes};
use http::HeaderMap;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// A response body that may be compressed.
    ///
    /// Produced by the compression service for every response: untouched
    /// passthrough, a buffered replacement, or a live compressed stream.
    #[project = CompressionBodyProj]
    #[allow(missing_docs)]
    pub enum CompressionBody<B> {
        /// Inner body passed through unchanged.
        Passthrough {
            #[pin]
            inner: B,
        },
        /// Fully buffered body produced by the buffered compression path.
        Complete {
            data: Option<Bytes>,
            trailers: Option<HeaderMap>,
        },
        /// Live stream fed through an incremental compressor.
        Compressed {
            #[pin]
            inner: B,
            state: StreamState,
        },
        /// Carrier for an error hit while buffering the inner body.
        Failed {
            error: Option<io::Error>,
        },
    }
}

/// State for an actively compressed stream.
pub(crate) struct StreamState {
    /// Taken on finish; `None` once the stream is terminated.
    encoder: Option<StreamEncoder>,
    stage: Stage,
    pending_trailers: Option<HeaderMap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Pulling chunks from the inner body.
    Streaming,
    /// Compressed data is done; trailers may remain.
    Trailers,
    /// Nothing left to emit.
    Done,
}

impl<B> CompressionBody<B> {
    /// Wraps a body without touching it.
    pub(crate) fn passthrough(inner: B) -> Self {
        Self::Passthrough { inner }
    }

    /// A body holding already-produced bytes, plus any trailers collected
    /// from the original stream.
    pub(crate) fn complete(data: Bytes, trailers: Option<HeaderMap>) -> Self {
        Self::Complete {
            data: Some(data),
            trailers,
        }
    }

    /// An empty body, used for `304 Not Modified` conversions.
    pub(crate) fn empty() -> Self {
        Self::Complete {
            data: None,
            trailers: None,
        }
    }

    /// Compresses the inner body through `encoder` as it is polled.
    pub(crate) fn compressed(inner: B, encoder: StreamEncoder) -> Self {
        Self::Compressed {
            inner,
            state: StreamState {
                encoder: Some(encoder),
                stage: Stage::Streaming,
                pending_trailers: None,
            },
        }
    }

    /// A body that yields `error` and ends.
    pub(crate) fn failed(error: io::Error) -> Self {
        Self::Failed { error: Some(error) }
    }
}

impl StreamState {
    fn take_finished(&mut self) -> io::Result<Vec<u8>> {
        match self.encoder.take() {
            Some(encoder) => encoder.finish(),
            None => Ok(Vec::new()),
        }
    }

    /// Drives the inner body through the encoder, one frame per resumption.
    ///
    /// An input chunk the codec absorbs without output is not an event worth
    /// waking the consumer for; the loop just pulls the next frame.
    fn poll_compressed<B>(
        &mut self,
        cx: &mut Context<'_>,
        mut inner: Pin<&mut B>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        loop {
            match self.stage {
                Stage::Done => return Poll::Ready(None),

                Stage::Trailers => {
                    self.stage = Stage::Done;
                    match self.pending_trailers.take() {
                        Some(trailers) => return Poll::Ready(Some(Ok(Frame::trailers(trailers)))),
                        None => return Poll::Ready(None),
                    }
                }

                Stage::Streaming => match inner.as_mut().poll_frame(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(None) => {
                        self.stage = Stage::Trailers;
                        match self.take_finished() {
                            Ok(data) if !data.is_empty() => {
                                return Poll::Ready(Some(Ok(Frame::data(Bytes::from(data)))));
                            }
                            Ok(_) => continue,
                            Err(error) => {
                                self.stage = Stage::Done;
                                return Poll::Ready(Some(Err(error)));
                            }
                        }
                    }
                    Poll::Ready(Some(Err(error))) => {
                        self.stage = Stage::Done;
                        return Poll::Ready(Some(Err(io::Error::other(error.into()))));
                    }
                    Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                        Ok(data) => {
                            let chunk = copy_to_bytes(data);
                            let Some(encoder) = self.encoder.as_mut() else {
                                self.stage = Stage::Done;
                                return Poll::Ready(None);
                            };
                            match encoder.compress(&chunk) {
                                Ok(output) if !output.is_empty() => {
                                    return Poll::Ready(Some(Ok(Frame::data(Bytes::from(output)))));
                                }
                                Ok(_) => continue,
                                Err(error) => {
                                    self.stage = Stage::Done;
                                    return Poll::Ready(Some(Err(error)));
                                }
                            }
                        }
                        Err(frame) => {
                            // Trailers end the data stream; finish now and
                            // emit them after the final compressed frame.
                            if let Ok(trailers) = frame.into_trailers() {
                                self.pending_trailers = Some(trailers);
                            }
                            self.stage = Stage::Trailers;
                            match self.take_finished() {
                                Ok(data) if !data.is_empty() => {
                                    return Poll::Ready(Some(Ok(Frame::data(Bytes::from(data)))));
                                }
                                Ok(_) => continue,
                                Err(error) => {
                                    self.stage = Stage::Done;
                                    return Poll::Ready(Some(Err(error)));
                                }
                            }
                        }
                    },
                },
            }
        }
    }
}

impl<B> Body for CompressionBody<B>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            CompressionBodyProj::Passthrough { inner } => match inner.poll_frame(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Ready(Some(Ok(frame))) => {
                    Poll::Ready(Some(Ok(frame.map_data(copy_to_bytes))))
                }
                Poll::Ready(Some(Err(error))) => {
                    Poll::Ready(Some(Err(io::Error::other(error.into()))))
                }
            },
            CompressionBodyProj::Complete { data, trailers } => {
                if let Some(data) = data.take() {
                    if !data.is_empty() {
                        return Poll::Ready(Some(Ok(Frame::data(data))));
                    }
                }
                match trailers.take() {
                    Some(trailers) => Poll::Ready(Some(Ok(Frame::trailers(trailers)))),
                    None => Poll::Ready(None),
                }
            }
            CompressionBodyProj::Compressed { inner, state } => state.poll_compressed(cx, inner),
            CompressionBodyProj::Failed { error } => match error.take() {
                Some(error) => Poll::Ready(Some(Err(error))),
                None => Poll::Ready(None),
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            CompressionBody::Passthrough { inner } => inner.is_end_stream(),
            CompressionBody::Complete { data, trailers } => data.is_none() && trailers.is_none(),
            CompressionBody::Compressed { state, .. } => state.stage == Stage::Done,
            CompressionBody::Failed { error } => error.is_none(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            CompressionBody::Passthrough { inner } => inner.size_hint(),
            CompressionBody::Complete { data, .. } => {
                SizeHint::with_exact(data.as_ref().map_or(0, |data| data.len() as u64))
            }
            // Compressed size is unknown until the stream ends.
            CompressionBody::Compressed { .. } => SizeHint::default(),
            CompressionBody::Failed { .. } => SizeHint::default(),
        }
    }
}

fn copy_to_bytes<D: Buf>(mut data: D) -> Bytes {
    data.copy_to_bytes(data.remaining())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Algorithm, CodecParams, decompress};
    use std::collections::VecDeque;
    use std::convert::Infallible;

    /// A test body that yields predefined frames.
    struct TestBody {
        frames: VecDeque<Frame<Bytes>>,
    }

    impl TestBody {
        fn new(frames: Vec<Frame<Bytes>>) -> Self {
            Self {
                frames: frames.into(),
            }
        }

        fn chunks(chunks: &[&[u8]]) -> Self {
            Self::new(
                chunks
                    .iter()
                    .map(|chunk| Frame::data(Bytes::copy_from_slice(chunk)))
                    .collect(),
            )
        }
    }

    impl Body for TestBody {
        type Data = Bytes;
        type Error = Infallible;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            match self.frames.pop_front() {
                Some(frame) => Poll::Ready(Some(Ok(frame))),
                None => Poll::Ready(None),
            }
        }
    }

    fn poll_body<B: Body + Unpin>(body: &mut B) -> Option<Result<Frame<B::Data>, B::Error>> {
        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);
        match Pin::new(body).poll_frame(&mut cx) {
            Poll::Ready(result) => result,
            Poll::Pending => None,
        }
    }

    fn collect_data<B>(body: &mut B) -> (Vec<u8>, Option<HeaderMap>)
    where
        B: Body + Unpin,
        B::Data: Buf,
        B::Error: std::fmt::Debug,
    {
        let mut data = Vec::new();
        let mut trailers = None;
        while let Some(result) = poll_body(body) {
            let frame = result.unwrap();
            match frame.into_data() {
                Ok(mut chunk) => {
                    while chunk.has_remaining() {
                        let piece = chunk.chunk();
                        data.extend_from_slice(piece);
                        let advanced = piece.len();
                        chunk.advance(advanced);
                    }
                }
                Err(frame) => {
                    if let Ok(t) = frame.into_trailers() {
                        trailers = Some(t);
                    }
                }
            }
        }
        (data, trailers)
    }

    fn encoder(algorithm: Algorithm) -> StreamEncoder {
        StreamEncoder::new(algorithm, &CodecParams::default()).unwrap()
    }

    const ALGORITHMS: [Algorithm; 4] = [
        Algorithm::Zstd,
        Algorithm::Brotli,
        Algorithm::Gzip,
        Algorithm::Deflate,
    ];

    #[test]
    fn test_passthrough_data() {
        let inner = TestBody::new(vec![Frame::data(Bytes::from("hello world"))]);
        let mut body = CompressionBody::passthrough(inner);

        let frame = poll_body(&mut body).unwrap().unwrap();
        assert!(frame.is_data());
        assert_eq!(frame.into_data().unwrap(), Bytes::from("hello world"));

        assert!(poll_body(&mut body).is_none());
    }

    #[test]
    fn test_passthrough_trailers() {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", "abc123".parse().unwrap());

        let inner = TestBody::new(vec![
            Frame::data(Bytes::from("data")),
            Frame::trailers(trailers),
        ]);
        let mut body = CompressionBody::passthrough(inner);

        let frame = poll_body(&mut body).unwrap().unwrap();
        assert!(frame.is_data());

        let frame = poll_body(&mut body).unwrap().unwrap();
        let received = frame.into_trailers().unwrap();
        assert_eq!(received.get("x-checksum").unwrap(), "abc123");

        assert!(poll_body(&mut body).is_none());
    }

    #[test]
    fn test_compressed_round_trip_many_chunks() {
        let chunks: &[&[u8]] = &[b"first ", b"", b"second ", b"", b"third"];

        for algorithm in ALGORITHMS {
            let inner = TestBody::chunks(chunks);
            let mut body = CompressionBody::compressed(inner, encoder(algorithm));

            let (compressed, _) = collect_data(&mut body);
            let restored = decompress(&compressed, algorithm).unwrap();
            assert_eq!(restored, b"first second third", "{algorithm:?}");
        }
    }

    #[test]
    fn test_compressed_round_trip_single_chunk() {
        for algorithm in ALGORITHMS {
            let inner = TestBody::chunks(&[b"lonely chunk"]);
            let mut body = CompressionBody::compressed(inner, encoder(algorithm));

            let (compressed, _) = collect_data(&mut body);
            let restored = decompress(&compressed, algorithm).unwrap();
            assert_eq!(restored, b"lonely chunk", "{algorithm:?}");
        }
    }

    #[test]
    fn test_compressed_round_trip_no_chunks() {
        for algorithm in ALGORITHMS {
            let inner = TestBody::new(Vec::new());
            let mut body = CompressionBody::compressed(inner, encoder(algorithm));

            let (compressed, _) = collect_data(&mut body);
            let restored = decompress(&compressed, algorithm).unwrap();
            assert!(restored.is_empty(), "{algorithm:?}");
        }
    }

    #[test]
    fn test_compressed_preserves_trailers() {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", "abc123".parse().unwrap());

        let inner = TestBody::new(vec![
            Frame::data(Bytes::from("hello world")),
            Frame::trailers(trailers),
        ]);
        let mut body = CompressionBody::compressed(inner, encoder(Algorithm::Gzip));

        let (compressed, trailers) = collect_data(&mut body);
        assert_eq!(
            decompress(&compressed, Algorithm::Gzip).unwrap(),
            b"hello world"
        );
        let trailers = trailers.expect("trailers frame");
        assert_eq!(trailers.get("x-checksum").unwrap(), "abc123");
    }

    #[test]
    fn test_compressed_drop_without_draining() {
        let inner = TestBody::chunks(&[b"abandoned"]);
        let mut body = CompressionBody::compressed(inner, encoder(Algorithm::Zstd));

        // One poll, then drop mid-stream; the encoder goes with it.
        let _ = poll_body(&mut body);
        drop(body);
    }

    #[test]
    fn test_complete_yields_data_then_trailers() {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", "abc123".parse().unwrap());

        let mut body: CompressionBody<TestBody> =
            CompressionBody::complete(Bytes::from("payload"), Some(trailers));
        assert_eq!(body.size_hint().exact(), Some(7));

        let frame = poll_body(&mut body).unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), Bytes::from("payload"));

        let frame = poll_body(&mut body).unwrap().unwrap();
        assert!(frame.is_trailers());

        assert!(poll_body(&mut body).is_none());
        assert!(body.is_end_stream());
    }

    #[test]
    fn test_empty_body_ends_immediately() {
        let mut body: CompressionBody<TestBody> = CompressionBody::empty();
        assert_eq!(body.size_hint().exact(), Some(0));
        assert!(poll_body(&mut body).is_none());
        assert!(body.is_end_stream());
    }

    #[test]
    fn test_failed_yields_error_once() {
        let mut body: CompressionBody<TestBody> =
            CompressionBody::failed(io::Error::other("inner body died"));
        assert!(!body.is_end_stream());

        let result = poll_body(&mut body).unwrap();
        assert!(result.is_err());

        assert!(poll_body(&mut body).is_none());
        assert!(body.is_end_stream());
    }

    #[test]
    fn test_compressed_size_hint_is_unknown() {
        let inner = TestBody::chunks(&[b"data"]);
        let body = CompressionBody::compressed(inner, encoder(Algorithm::Gzip));
        assert_eq!(body.size_hint().exact(), None);
    }
}
