//! Body framing: format byte, length prefix, request padding
//!
//! Both directions frame their CBOR document the same way: one
//! compression-format byte, a 4-byte big-endian payload length, then the
//! payload. Requests are additionally zero-padded so the encapsulated
//! request's total size is a power of two, keeping observable request sizes
//! to a small discrete set.

use sigkv_core::{ErrorInfo, Result};

use crate::compress::CompressionScheme;

/// Size of the compression-format byte.
pub const COMPRESSION_FORMAT_SIZE: usize = 1;

/// Size of the big-endian payload length field.
pub const PAYLOAD_LENGTH_SIZE: usize = 4;

/// Framing header: format byte plus length field.
pub const FRAMING_HEADER_SIZE: usize = COMPRESSION_FORMAT_SIZE + PAYLOAD_LENGTH_SIZE;

/// Fixed overhead the encryption layer adds around a request body: 7-byte
/// key-config header, 32-byte encapsulated key, 16-byte AEAD tag. The
/// padding computation must account for it so the ciphertext, not the
/// plaintext, lands on a power of two.
pub const ENCAPSULATION_OVERHEAD: usize = 55;

/// Frame an uncompressed request document and pad it so the encapsulated
/// request's total size is the next power of two.
///
/// Layout: `[0x00][len(payload) BE][payload][zero padding]`. The request
/// body itself is never compressed; only responses may be.
pub fn frame_and_pad_request(payload: &[u8]) -> Vec<u8> {
    let length = u32::try_from(payload.len()).expect("request document exceeds u32 length");
    let unpadded_total = ENCAPSULATION_OVERHEAD + FRAMING_HEADER_SIZE + payload.len();
    let body_size = unpadded_total.next_power_of_two() - ENCAPSULATION_OVERHEAD;

    let mut body = Vec::with_capacity(body_size);
    body.push(CompressionScheme::None.format_byte());
    body.extend_from_slice(&length.to_be_bytes());
    body.extend_from_slice(payload);
    body.resize(body_size, 0x00);
    body
}

/// Split a decrypted response body into its compression scheme and the
/// CBOR document it frames. Trailing padding after the declared length is
/// ignored.
pub fn read_response_frame(body: &[u8]) -> Result<(CompressionScheme, &[u8])> {
    if body.len() <= FRAMING_HEADER_SIZE {
        return Err(ErrorInfo::new("Response shorter than framing header."));
    }

    let scheme = CompressionScheme::from_format_byte(body[0])?;
    let length =
        u32::from_be_bytes(body[1..FRAMING_HEADER_SIZE].try_into().unwrap()) as usize;

    let rest = &body[FRAMING_HEADER_SIZE..];
    if rest.len() < length {
        return Err(ErrorInfo::new(
            "Response body is shorter than declared CBOR string length.",
        ));
    }
    Ok((scheme, &rest[..length]))
}
