//! Raw DEFLATE framing for texture payloads.
//!
//! Archive payloads carry no zlib or gzip header, so both directions use the
//! raw stream state machines. Decompression is two-phase: the texture header
//! is inflated first, and the rest of the stream is only paid for when that
//! header shows the texture needs repair.
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::CodecError;
use crate::tex;

/// Inflates `compressed` into `out`, stopping early when the leading texture
/// header shows there is nothing to repair.
///
/// Returns `true` when `out` holds the complete payload and `false` when the
/// texture was left alone, in which case the contents of `out` are
/// unspecified.
pub fn decompress(compressed: &[u8], out: &mut [u8]) -> Result<bool, CodecError> {
    if out.len() < tex::TEX_HEADER_SIZE {
        return Ok(false);
    }

    let mut inflater = Decompress::new(false);
    let status = inflater.decompress(
        compressed,
        &mut out[..tex::TEX_HEADER_SIZE],
        FlushDecompress::Sync,
    )?;
    if (inflater.total_out() as usize) < tex::TEX_HEADER_SIZE {
        return Err(CodecError::HeaderIncomplete);
    }
    if status == Status::StreamEnd || !tex::needs_fixing(&out[..tex::TEX_HEADER_SIZE])? {
        return Ok(false);
    }

    let consumed = inflater.total_in() as usize;
    let status = inflater.decompress(
        &compressed[consumed..],
        &mut out[tex::TEX_HEADER_SIZE..],
        FlushDecompress::Finish,
    )?;
    if status != Status::StreamEnd || inflater.total_out() as usize != out.len() {
        return Err(CodecError::DecompressedSize);
    }
    if inflater.total_in() as usize != compressed.len() {
        return Err(CodecError::CompressedSize);
    }
    Ok(true)
}

/// Deflates `data`, giving up as soon as the result would not be strictly
/// smaller than the input. Returns the compressed bytes, or `None` when the
/// caller should store the raw form.
pub fn compress(data: &[u8], level: Compression) -> Result<Option<Vec<u8>>, CodecError> {
    let mut deflater = Compress::new(level, false);
    let mut out = vec![0u8; data.len().saturating_sub(1)];

    let status = deflater.compress(data, &mut out, FlushCompress::Finish)?;
    match status {
        Status::StreamEnd => {
            if deflater.total_in() as usize != data.len() {
                return Err(CodecError::CompressTruncated);
            }
            out.truncate(deflater.total_out() as usize);
            Ok(Some(out))
        }
        _ => Ok(None),
    }
}
