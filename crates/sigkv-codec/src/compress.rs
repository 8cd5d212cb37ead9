//! Compression schemes for response compression groups

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use sigkv_core::{ErrorInfo, Result};

/// Compression applied to a compression group's `content` bytes.
///
/// The response framing byte carries the scheme in its low two bits; the
/// higher bits are reserved and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionScheme {
    None,
    Gzip,
}

/// Schemes the client accepts in responses, in preference order. Serialized
/// into the request's `acceptCompression` list.
pub const ACCEPTED_SCHEMES: [CompressionScheme; 2] =
    [CompressionScheme::None, CompressionScheme::Gzip];

impl CompressionScheme {
    /// Decode the scheme from a framing format byte.
    pub fn from_format_byte(byte: u8) -> Result<Self> {
        match byte & 0x03 {
            0x00 => Ok(Self::None),
            0x02 => Ok(Self::Gzip),
            _ => Err(ErrorInfo::new("Unsupported compression scheme.")),
        }
    }

    /// Format byte announcing this scheme.
    pub fn format_byte(self) -> u8 {
        match self {
            Self::None => 0x00,
            Self::Gzip => 0x02,
        }
    }

    /// Name used in the request's `acceptCompression` list.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
        }
    }
}

/// Gzip-compress `data`. Used by the gateway half of the channel and by
/// tests that synthesize compressed responses.
pub fn gzip_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    // Writing into a Vec cannot fail.
    encoder.write_all(data).expect("gzip write to Vec");
    encoder.finish().expect("gzip finish to Vec")
}

/// Inflate a gzip stream from an untrusted response.
pub fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|_| ErrorInfo::new("Failed to decompress content string with Gzip."))?;
    Ok(out)
}
