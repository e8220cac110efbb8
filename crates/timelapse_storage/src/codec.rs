//! Body content encodings.
//!
//! Response bodies are kept compressed at rest. A body that arrived with a
//! `Content-Encoding` is stored exactly as it came off the wire; an identity
//! body is compressed with zstd by the store.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Encoding of stored body bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentEncoding {
    /// Plain bytes
    Identity,
    /// gzip
    Gzip,
    /// zlib-wrapped (or raw) deflate
    Deflate,
    /// Brotli
    Brotli,
    /// Zstandard
    Zstd,
    /// Anything else, kept verbatim
    Other(String),
}

impl ContentEncoding {
    /// Parse a `Content-Encoding` header value
    #[must_use]
    pub fn from_header(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "identity" => Self::Identity,
            "gzip" | "x-gzip" => Self::Gzip,
            "deflate" => Self::Deflate,
            "br" => Self::Brotli,
            "zstd" => Self::Zstd,
            other => Self::Other(other.to_string()),
        }
    }

    /// Header token for this encoding
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::Brotli => "br",
            Self::Zstd => "zstd",
            Self::Other(other) => other,
        }
    }

    /// Compress `data` with this encoding
    ///
    /// # Errors
    ///
    /// Returns error for [`ContentEncoding::Other`] or if the encoder fails
    pub fn encode(&self, data: &[u8], level: i32) -> StoreResult<Vec<u8>> {
        let io_err = |e: std::io::Error| StoreError::Encoding {
            reason: format!("{} encoder: {}", self.as_str(), e),
        };
        match self {
            Self::Identity => Ok(data.to_vec()),
            Self::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate_level(level));
                encoder.write_all(data).map_err(io_err)?;
                encoder.finish().map_err(io_err)
            }
            Self::Deflate => {
                let mut encoder =
                    flate2::write::ZlibEncoder::new(Vec::new(), flate_level(level));
                encoder.write_all(data).map_err(io_err)?;
                encoder.finish().map_err(io_err)
            }
            Self::Brotli => {
                let quality = level.clamp(0, 11) as u32;
                let mut encoder = brotli::CompressorWriter::new(Vec::new(), 4096, quality, 22);
                encoder.write_all(data).map_err(io_err)?;
                encoder.flush().map_err(io_err)?;
                Ok(encoder.into_inner())
            }
            Self::Zstd => zstd::stream::encode_all(data, level).map_err(io_err),
            Self::Other(other) => Err(StoreError::UnsupportedEncoding(other.clone())),
        }
    }

    /// Decompress `data` that was stored with this encoding
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Decompression`] if the bytes are not valid for
    /// the encoding, or [`StoreError::UnsupportedEncoding`]
    pub fn decode(&self, data: &[u8]) -> StoreResult<Vec<u8>> {
        let mut out = Vec::new();
        let result = match self {
            Self::Identity => return Ok(data.to_vec()),
            Self::Gzip => flate2::read::GzDecoder::new(data).read_to_end(&mut out),
            Self::Deflate => {
                let zlib = flate2::read::ZlibDecoder::new(data).read_to_end(&mut out);
                if zlib.is_err() {
                    // Some servers send raw deflate streams without the zlib header.
                    out.clear();
                    flate2::read::DeflateDecoder::new(data).read_to_end(&mut out)
                } else {
                    zlib
                }
            }
            Self::Brotli => brotli::Decompressor::new(data, 4096).read_to_end(&mut out),
            Self::Zstd => zstd::stream::decode_all(data).map(|decoded| {
                out = decoded;
                out.len()
            }),
            Self::Other(other) => return Err(StoreError::UnsupportedEncoding(other.clone())),
        };
        result.map_err(|e| StoreError::Decompression {
            encoding: self.as_str().to_string(),
            reason: e.to_string(),
        })?;
        Ok(out)
    }
}

impl std::fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn flate_level(level: i32) -> flate2::Compression {
    flate2::Compression::new(level.clamp(0, 9) as u32)
}
