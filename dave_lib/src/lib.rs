//! A library for repairing texture data inside DAVE-format `.DAT` archives.
//!
//! The archives ship DXT5 textures whose color blocks use the ambiguous
//! punch-through endpoint order and mipmap chains that claim more levels
//! than are actually stored. [`dat::repair_archive`] streams an archive
//! through the texture repairer and writes an equivalent archive in which
//! every block uses the opaque endpoint order and every chain length matches
//! the stored levels.
//!
//! Payloads are raw DEFLATE streams or stored uncompressed; a rewritten
//! texture is only recompressed when that makes it strictly smaller.

pub mod codec;
pub mod dat;
pub mod error;
pub mod tex;
