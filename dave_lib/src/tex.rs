//! Texture payloads stored in DAVE archives.
//!
//! A payload is a small header followed by a mipmap chain. Repair trims the
//! chain down to the levels that are actually stored with 4-aligned
//! dimensions and rewrites every DXT5 color block that still uses the
//! punch-through endpoint order.
use std::io::Cursor;

use binrw::{BinRead, BinReaderExt, BinWrite, BinWriterExt};

use crate::error::TextureError;

pub mod dxt5;

/// Size of [`TexHeader`] on disk.
pub const TEX_HEADER_SIZE: usize = 14;

const BLOCK_SIZE: usize = 16;

/// Fixed header at the start of every texture payload.
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
pub struct TexHeader {
    pub width: u16,
    pub height: u16,
    #[br(map = |raw: u16| TexFormat::from_raw(raw))]
    #[bw(map = |format: &TexFormat| format.to_raw())]
    pub format: TexFormat,
    pub mipmap_count: u16,
    /// Preserved verbatim, meaning unknown.
    pub unk: [u16; 3],
}

/// Pixel formats that appear in the archives. Only the two block-compressed
/// formats are ever repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexFormat {
    /// 8 bytes per 4x4 block.
    Dxt1,
    /// 16 bytes per 4x4 block.
    Dxt5,
    Other(u16),
}

impl TexFormat {
    fn from_raw(raw: u16) -> Self {
        match raw {
            22 => Self::Dxt1,
            26 => Self::Dxt5,
            other => Self::Other(other),
        }
    }

    fn to_raw(self) -> u16 {
        match self {
            Self::Dxt1 => 22,
            Self::Dxt5 => 26,
            Self::Other(other) => other,
        }
    }

    /// Average pixels per stored byte, for mip level sizes.
    fn pixels_per_byte(self) -> Option<usize> {
        match self {
            Self::Dxt1 => Some(2),
            Self::Dxt5 => Some(1),
            Self::Other(_) => None,
        }
    }
}

/// Result of repairing a single texture payload.
#[derive(Debug)]
pub enum Repair {
    /// Every chain level and block already satisfied the invariants.
    Unchanged,
    /// The payload was rewritten and these bytes replace the old ones.
    Modified(Vec<u8>),
}

fn read_header(data: &[u8]) -> Result<TexHeader, TextureError> {
    if data.len() < TEX_HEADER_SIZE {
        return Err(TextureError::TooSmall);
    }
    Ok(Cursor::new(data).read_le()?)
}

/// Counts the leading mip levels whose dimensions are both 4-aligned and
/// sums their stored size. The chain is allowed to run out once both
/// dimensions drop below 4; a misaligned dimension still at 4 or above is a
/// hard error.
fn measure_chain(
    header: &TexHeader,
    pixels_per_byte: usize,
) -> Result<(u16, usize), TextureError> {
    let mut width = header.width as usize;
    let mut height = header.height as usize;
    let mut bytes = TEX_HEADER_SIZE;
    let mut levels = 0u16;
    while levels < header.mipmap_count {
        if width % 4 != 0 || height % 4 != 0 {
            if width >= 4 || height >= 4 {
                return Err(TextureError::NonPowerOfTwo);
            }
            break;
        }
        bytes += width * height / pixels_per_byte;
        width /= 2;
        height /= 2;
        levels += 1;
    }
    Ok((levels, bytes))
}

/// Decides from the payload header alone whether the full payload has to be
/// inspected. DXT5 textures always qualify; DXT1 textures only when their
/// declared chain runs past the last valid level.
pub fn needs_fixing(data: &[u8]) -> Result<bool, TextureError> {
    let header = read_header(data)?;
    match header.format {
        TexFormat::Dxt5 => Ok(true),
        TexFormat::Dxt1 => {
            if header.width == 0 || header.height == 0 {
                return Ok(false);
            }
            let (levels, _) = measure_chain(&header, 2)?;
            Ok(levels < header.mipmap_count)
        }
        TexFormat::Other(_) => Ok(false),
    }
}

/// Repairs one texture payload: trims the mipmap chain to the valid levels
/// and canonicalizes every DXT5 color block.
pub fn fix(data: &[u8]) -> Result<Repair, TextureError> {
    let mut header = read_header(data)?;
    let Some(pixels_per_byte) = header.format.pixels_per_byte() else {
        return Ok(Repair::Unchanged);
    };
    if header.width == 0 || header.height == 0 {
        return Ok(Repair::Unchanged);
    }

    let (levels, expected) = measure_chain(&header, pixels_per_byte)?;
    if levels == 0 {
        return Err(TextureError::NoMipLevels);
    }

    let mut buf = data.to_vec();
    let mut dirty = false;

    if levels == header.mipmap_count {
        if buf.len() != expected {
            return Err(TextureError::InvalidSize);
        }
    } else {
        if buf.len() < expected {
            return Err(TextureError::ShorterThanExpected);
        }
        header.mipmap_count = levels;
        write_header(&mut buf, &header)?;
        buf.truncate(expected);
        dirty = true;
    }

    if header.format == TexFormat::Dxt5 {
        let mut offset = TEX_HEADER_SIZE;
        let mut blocks = (header.width as usize / 4) * (header.height as usize / 4);
        for _ in 0..header.mipmap_count {
            for _ in 0..blocks {
                dirty |= fix_chunk(&mut buf[offset..offset + BLOCK_SIZE])?;
                offset += BLOCK_SIZE;
            }
            blocks /= 4;
        }
        if offset != expected {
            return Err(TextureError::TooSmall);
        }
    }

    Ok(if dirty {
        Repair::Modified(buf)
    } else {
        Repair::Unchanged
    })
}

/// Canonicalizes the color half of one 16-byte block. The 8 alpha bytes are
/// never touched.
fn fix_chunk(chunk: &mut [u8]) -> Result<bool, TextureError> {
    let cs0 = u16::from_le_bytes([chunk[8], chunk[9]]);
    let cs1 = u16::from_le_bytes([chunk[10], chunk[11]]);
    let cv = u32::from_le_bytes([chunk[12], chunk[13], chunk[14], chunk[15]]);

    let (cs0, cs1, cv) = if cs0 < cs1 {
        if cv & dxt5::HIGH_BITS == 0 {
            // Only the two endpoint slots are live, so swapping them is
            // exact.
            (cs1, cs0, cv ^ dxt5::LOW_BITS)
        } else {
            let (a, b, cv) = dxt5::repair(cs0, cs1, cv)?;
            dxt5::canonicalize(a, b, cv)
        }
    } else if cs0 == cs1 {
        dxt5::canonicalize(cs0, cs1, cv)
    } else {
        return Ok(false);
    };

    chunk[8..10].copy_from_slice(&cs0.to_le_bytes());
    chunk[10..12].copy_from_slice(&cs1.to_le_bytes());
    chunk[12..16].copy_from_slice(&cv.to_le_bytes());
    Ok(true)
}

fn write_header(buf: &mut [u8], header: &TexHeader) -> Result<(), TextureError> {
    let mut writer = Cursor::new(buf);
    writer.write_le(header)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use hexlit::hex;

    fn payload(width: u16, height: u16, format: u16, mipmaps: u16, body: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        for value in [width, height, format, mipmaps, 0, 0, 0] {
            data.extend_from_slice(&value.to_le_bytes());
        }
        data.extend_from_slice(body);
        data
    }

    fn block(cs0: u16, cs1: u16, cv: u32) -> Vec<u8> {
        let mut data = vec![0xEE; 8];
        data.extend_from_slice(&cs0.to_le_bytes());
        data.extend_from_slice(&cs1.to_le_bytes());
        data.extend_from_slice(&cv.to_le_bytes());
        data
    }

    #[test]
    fn all_black_block_becomes_trivial_form() {
        let data = payload(4, 4, 26, 1, &block(0, 0, 0));
        let Repair::Modified(fixed) = fix(&data).unwrap() else {
            panic!("expected a rewrite");
        };
        assert_eq!(&fixed[14..], hex!(EEEEEEEEEEEEEEEE 0100 0000 55555555));
    }

    #[test]
    fn endpoint_only_block_is_reframed_exactly() {
        let data = payload(4, 4, 26, 1, &block(0x0000, 0xFFFF, 0));
        let Repair::Modified(fixed) = fix(&data).unwrap() else {
            panic!("expected a rewrite");
        };
        assert_eq!(&fixed[14..], hex!(EEEEEEEEEEEEEEEE FFFF 0000 55555555));
    }

    #[test]
    fn canonical_texture_is_untouched() {
        let data = payload(4, 4, 26, 1, &block(0xFFFF, 0x0000, 0x00FF_00FF));
        assert!(matches!(fix(&data).unwrap(), Repair::Unchanged));
    }

    #[test]
    fn repair_is_idempotent() {
        let data = payload(4, 4, 26, 1, &block(0x0421, 0x1084, 0x0000_AAAA));
        let Repair::Modified(fixed) = fix(&data).unwrap() else {
            panic!("expected a rewrite");
        };
        assert!(matches!(fix(&fixed).unwrap(), Repair::Unchanged));
    }

    #[test]
    fn blocks_are_fixed_across_levels() {
        let mut body = Vec::new();
        for _ in 0..4 {
            body.extend_from_slice(&block(0x2000, 0x1000, 0));
        }
        // A punch-through block in the 4x4 level.
        body.extend_from_slice(&block(0x0000, 0xFFFF, 0));
        let data = payload(8, 8, 26, 2, &body);

        let Repair::Modified(fixed) = fix(&data).unwrap() else {
            panic!("expected a rewrite");
        };
        assert_eq!(&fixed[..14 + 64], &data[..14 + 64]);
        let last = &fixed[14 + 64..];
        assert_eq!(&last[8..], hex!(FFFF 0000 55555555));
    }

    #[test]
    fn overlong_chain_is_trimmed() {
        let data = payload(8, 8, 22, 5, &vec![0xAB; 52]);
        let Repair::Modified(fixed) = fix(&data).unwrap() else {
            panic!("expected a trim");
        };
        assert_eq!(fixed.len(), 14 + 8 * 8 / 2 + 4 * 4 / 2);
        assert_eq!(u16::from_le_bytes([fixed[6], fixed[7]]), 2);
    }

    #[test]
    fn trim_requires_the_valid_levels_to_be_present() {
        let data = payload(8, 8, 22, 5, &vec![0xAB; 30]);
        assert!(matches!(
            fix(&data),
            Err(TextureError::ShorterThanExpected)
        ));
    }

    #[test]
    fn untrimmed_chain_must_match_exactly() {
        let data = payload(8, 8, 22, 2, &vec![0xAB; 41]);
        assert!(matches!(fix(&data), Err(TextureError::InvalidSize)));
    }

    #[test]
    fn misaligned_large_level_is_rejected() {
        let data = payload(12, 12, 22, 2, &vec![0; 72]);
        assert!(matches!(fix(&data), Err(TextureError::NonPowerOfTwo)));
    }

    #[test]
    fn degenerate_textures_pass_through() {
        let zero = payload(0, 8, 26, 1, &[]);
        assert!(matches!(fix(&zero).unwrap(), Repair::Unchanged));

        let other = payload(8, 8, 0, 1, &[1, 2, 3]);
        assert!(matches!(fix(&other).unwrap(), Repair::Unchanged));
    }

    #[test]
    fn needs_fixing_per_format() {
        assert!(needs_fixing(&payload(4, 4, 26, 1, &[])).unwrap());
        assert!(!needs_fixing(&payload(8, 8, 22, 2, &[])).unwrap());
        assert!(needs_fixing(&payload(8, 8, 22, 5, &[])).unwrap());
        assert!(!needs_fixing(&payload(8, 8, 0, 5, &[])).unwrap());
        assert!(matches!(
            needs_fixing(&[0u8; 10]),
            Err(TextureError::TooSmall)
        ));
    }
}
