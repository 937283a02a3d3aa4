//! Shared error types for archive, texture, and codec operations.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatError {
    #[error("unknown DAT file format, maybe a ZIP file?")]
    UnknownFormat,

    #[error("file name lies outside the name blob")]
    NameOutOfBounds,

    #[error("invalid delta encoding in base64 name blob")]
    InvalidDeltaPrefix,

    #[error("invalid character in base64 file name")]
    InvalidNameChar,

    #[error("compressed texture larger than decompressed is invalid")]
    OversizedCompression,

    #[error(transparent)]
    Texture(#[from] TextureError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("error reading archive structures")]
    Binrw(#[from] binrw::Error),

    #[error("error reading or writing archive data")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TextureError {
    #[error("texture smaller than its header")]
    TooSmall,

    #[error("unexpected non-power-of-two texture")]
    NonPowerOfTwo,

    #[error("texture contains no valid mipmap levels")]
    NoMipLevels,

    #[error("texture is an invalid size")]
    InvalidSize,

    #[error("texture is not as large as expected")]
    ShorterThanExpected,

    #[error("invalid DXT5 color encoding")]
    InvalidBlockEncoding,

    #[error("error reading texture header")]
    Binrw(#[from] binrw::Error),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unable to decompress tex header")]
    HeaderIncomplete,

    #[error("decompressed size incorrect")]
    DecompressedSize,

    #[error("compressed size incorrect")]
    CompressedSize,

    #[error("texture not completely compressed")]
    CompressTruncated,

    #[error(transparent)]
    Texture(#[from] TextureError),

    #[error("error inflating texture stream")]
    Inflate(#[from] flate2::DecompressError),

    #[error("error deflating texture stream")]
    Deflate(#[from] flate2::CompressError),
}
