use std::io::{self, Read, Write};
use std::mem;

use brotli::CompressorWriter;
use brotli::enc::BrotliEncoderParams;
use brotli::enc::backward_references::BrotliEncoderMode;
use flate2::Compression;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use zstd::stream::write::Encoder as ZstdEncoder;

/// Output buffer size handed to the incremental brotli encoder.
const BROTLI_BUFFER_SIZE: usize = 4096;

/// Supported compression algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Algorithm {
    /// Zstandard compression.
    Zstd,
    /// Brotli compression.
    Brotli,
    /// Gzip compression.
    Gzip,
    /// Zlib-wrapped deflate compression.
    Deflate,
}

impl Algorithm {
    /// Returns the `Content-Encoding` token for this algorithm.
    pub fn token(&self) -> &'static str {
        match self {
            Algorithm::Zstd => "zstd",
            Algorithm::Brotli => "br",
            Algorithm::Gzip => "gzip",
            Algorithm::Deflate => "deflate",
        }
    }

    /// Resolves a lowercased `Accept-Encoding` token, including the
    /// historical `brotli` and `x-gzip` aliases.
    pub(crate) fn from_token(token: &str) -> Option<Algorithm> {
        match token {
            "zstd" => Some(Algorithm::Zstd),
            "br" | "brotli" => Some(Algorithm::Brotli),
            "gzip" | "x-gzip" => Some(Algorithm::Gzip),
            "deflate" => Some(Algorithm::Deflate),
            _ => None,
        }
    }
}

/// Gzip codec parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GzipParams {
    /// Compression level, 0-9.
    pub level: u32,
}

impl Default for GzipParams {
    fn default() -> Self {
        Self { level: 6 }
    }
}

/// Deflate (zlib-wrapped) codec parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeflateParams {
    /// Compression level, 0-9.
    pub level: u32,
}

impl Default for DeflateParams {
    fn default() -> Self {
        Self { level: 6 }
    }
}

/// Brotli encoder mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BrotliMode {
    /// No assumptions about the input.
    #[default]
    Generic,
    /// UTF-8 text input.
    Text,
    /// WOFF 2.0 font input.
    Font,
}

/// Brotli codec parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrotliParams {
    /// Compression quality, 0-11.
    pub quality: u32,
    /// Encoder mode hint.
    pub mode: BrotliMode,
    /// Base-2 logarithm of the sliding window size, 10-24.
    pub window: u32,
    /// Base-2 logarithm of the maximum input block size, 16-24, or 0 to let
    /// the encoder choose.
    pub block: u32,
}

impl Default for BrotliParams {
    fn default() -> Self {
        Self {
            quality: 4,
            mode: BrotliMode::Generic,
            window: 22,
            block: 0,
        }
    }
}

/// Zstandard codec parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZstdParams {
    /// Compression level, 1-22.
    pub level: i32,
}

impl Default for ZstdParams {
    fn default() -> Self {
        Self { level: 3 }
    }
}

/// Parameters for every supported codec, each algorithm carrying its own
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecParams {
    /// Gzip parameters.
    pub gzip: GzipParams,
    /// Deflate parameters.
    pub deflate: DeflateParams,
    /// Brotli parameters.
    pub brotli: BrotliParams,
    /// Zstandard parameters.
    pub zstd: ZstdParams,
}

fn brotli_encoder_params(params: &BrotliParams) -> BrotliEncoderParams {
    BrotliEncoderParams {
        quality: params.quality as i32,
        mode: match params.mode {
            BrotliMode::Generic => BrotliEncoderMode::BROTLI_MODE_GENERIC,
            BrotliMode::Text => BrotliEncoderMode::BROTLI_MODE_TEXT,
            BrotliMode::Font => BrotliEncoderMode::BROTLI_MODE_FONT,
        },
        lgwin: params.window as i32,
        lgblock: params.block as i32,
        ..BrotliEncoderParams::default()
    }
}

/// Compresses a complete buffer with the given algorithm.
pub(crate) fn compress(data: &[u8], algorithm: Algorithm, params: &CodecParams) -> io::Result<Vec<u8>> {
    match algorithm {
        Algorithm::Zstd => zstd::bulk::compress(data, params.zstd.level),
        Algorithm::Brotli => {
            let mut output = Vec::new();
            brotli::enc::BrotliCompress(
                &mut io::Cursor::new(data),
                &mut output,
                &brotli_encoder_params(&params.brotli),
            )?;
            Ok(output)
        }
        Algorithm::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::new(params.gzip.level));
            encoder.write_all(data)?;
            encoder.finish()
        }
        Algorithm::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(params.deflate.level));
            encoder.write_all(data)?;
            encoder.finish()
        }
    }
}

/// Decompresses a complete buffer produced by [`Algorithm`]'s encoder.
///
/// This is the verification half of the codec boundary; the middleware itself
/// never decompresses.
pub fn decompress(data: &[u8], algorithm: Algorithm) -> io::Result<Vec<u8>> {
    match algorithm {
        Algorithm::Zstd => zstd::stream::decode_all(data),
        Algorithm::Brotli => {
            let mut output = Vec::new();
            brotli::BrotliDecompress(&mut io::Cursor::new(data), &mut output)?;
            Ok(output)
        }
        Algorithm::Gzip => {
            let mut output = Vec::new();
            GzDecoder::new(data).read_to_end(&mut output)?;
            Ok(output)
        }
        Algorithm::Deflate => {
            let mut output = Vec::new();
            ZlibDecoder::new(data).read_to_end(&mut output)?;
            Ok(output)
        }
    }
}

/// An incremental compressor scoped to a single response.
///
/// Each variant writes compressed output into an owned `Vec<u8>` that is
/// drained after every chunk; a drain may legitimately come back empty while
/// the codec buffers internally. Dropping the encoder releases the codec
/// without flushing, so early termination leaks nothing.
pub(crate) enum StreamEncoder {
    Zstd(ZstdEncoder<'static, Vec<u8>>),
    Brotli(Box<CompressorWriter<Vec<u8>>>),
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(ZlibEncoder<Vec<u8>>),
}

impl StreamEncoder {
    pub(crate) fn new(algorithm: Algorithm, params: &CodecParams) -> io::Result<Self> {
        Ok(match algorithm {
            Algorithm::Zstd => Self::Zstd(ZstdEncoder::new(Vec::new(), params.zstd.level)?),
            Algorithm::Brotli => Self::Brotli(Box::new(CompressorWriter::with_params(
                Vec::new(),
                BROTLI_BUFFER_SIZE,
                &brotli_encoder_params(&params.brotli),
            ))),
            Algorithm::Gzip => Self::Gzip(GzEncoder::new(
                Vec::new(),
                Compression::new(params.gzip.level),
            )),
            Algorithm::Deflate => Self::Deflate(ZlibEncoder::new(
                Vec::new(),
                Compression::new(params.deflate.level),
            )),
        })
    }

    /// Feeds one chunk and returns whatever output the codec produced for it.
    pub(crate) fn compress(&mut self, chunk: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Self::Zstd(encoder) => {
                encoder.write_all(chunk)?;
                Ok(mem::take(encoder.get_mut()))
            }
            Self::Brotli(encoder) => {
                encoder.write_all(chunk)?;
                Ok(mem::take(encoder.get_mut()))
            }
            Self::Gzip(encoder) => {
                encoder.write_all(chunk)?;
                Ok(mem::take(encoder.get_mut()))
            }
            Self::Deflate(encoder) => {
                encoder.write_all(chunk)?;
                Ok(mem::take(encoder.get_mut()))
            }
        }
    }

    /// Terminates the stream and returns the remaining output.
    pub(crate) fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            Self::Zstd(encoder) => encoder.finish(),
            Self::Brotli(encoder) => Ok(encoder.into_inner()),
            Self::Gzip(encoder) => encoder.finish(),
            Self::Deflate(encoder) => encoder.finish(),
        }
    }
}
