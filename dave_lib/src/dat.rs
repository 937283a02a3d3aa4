//! The DAVE archive container and the repair pass over it.
//!
//! An archive is a 16-byte header, a file table at offset 2048, a name blob
//! after it, and payload data aligned to 2048-byte boundaries. The repair
//! pass streams every entry from the input to the output, rewriting the
//! `.tex` payloads that need it and rebuilding the file table.
use std::io::{Read, Seek, SeekFrom, Write};

use binrw::{BinRead, BinReaderExt, BinWrite, BinWriterExt};
use flate2::Compression;
use log::{debug, info};

use crate::codec;
use crate::error::DatError;
use crate::tex::{self, Repair};

/// Alignment granule for payload data and the archive tail.
const ALIGN: u64 = 2048;
/// Absolute offset of the file table.
const TABLE_OFFSET: u64 = 2048;

const MAGIC_PLAIN: u32 = 0x4556_4144;
const MAGIC_PACKED: u32 = 0x6576_6144;

/// How file names are stored in the name blob.
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameEncoding {
    /// NUL-terminated bytes at each entry's name offset.
    #[brw(magic(b"DAVE"))]
    Plain,
    /// Packed 6-bit units with delta-compressed shared prefixes.
    #[brw(magic(b"Dave"))]
    Packed,
}

/// Fixed header at the start of every archive.
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
pub struct DatHeader {
    pub encoding: NameEncoding,
    pub num_files: u32,
    pub meta_len: u32,
    pub name_len: u32,
}

/// A file-table entry. Offsets are absolute; equal lengths mean the payload
/// is stored raw.
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
pub struct FileEntry {
    pub name_offset: u32,
    pub data_offset: u32,
    pub decompress_len: u32,
    pub compress_len: u32,
}

/// Settings carried from the command line into the codec.
#[derive(Debug, Clone, Copy)]
pub struct RepairOptions {
    /// DEFLATE effort for payloads that have to be recompressed.
    pub compression: Compression,
}

impl RepairOptions {
    /// Options with an explicit DEFLATE level in `0..=9`.
    pub fn with_level(level: u32) -> Self {
        Self {
            compression: Compression::new(level),
        }
    }
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
        }
    }
}

/// Streams `input` to `output`, repairing every `.tex` payload that needs
/// it. The header and name blob are copied verbatim; payload offsets and
/// lengths are recomputed and the file table rewritten.
pub fn repair_archive<R, W>(
    input: &mut R,
    output: &mut W,
    options: &RepairOptions,
) -> Result<(), DatError>
where
    R: Read + Seek,
    W: Write + Seek,
{
    input.seek(SeekFrom::Start(0))?;
    let header = read_header(input)?;
    debug!(
        "{} files, {:?} names",
        header.num_files, header.encoding
    );
    output.seek(SeekFrom::Start(0))?;
    output.write_le(&header)?;

    input.seek(SeekFrom::Start(TABLE_OFFSET))?;
    let mut entries = Vec::with_capacity(header.num_files as usize);
    for _ in 0..header.num_files {
        entries.push(input.read_le::<FileEntry>()?);
    }

    let names_offset = TABLE_OFFSET + u64::from(header.meta_len);
    let mut blob = vec![0u8; header.name_len as usize];
    input.seek(SeekFrom::Start(names_offset))?;
    input.read_exact(&mut blob)?;
    output.seek(SeekFrom::Start(names_offset))?;
    output.write_all(&blob)?;

    let names = NameTable {
        encoding: header.encoding,
        blob,
    };

    output.seek(SeekFrom::Start(names_offset + u64::from(header.name_len)))?;

    let mut previous = String::new();
    for entry in &mut entries {
        let name = names.decode(entry.name_offset, &previous)?;

        let mut payload = vec![0u8; entry.compress_len as usize];
        input.seek(SeekFrom::Start(u64::from(entry.data_offset)))?;
        input.read_exact(&mut payload)?;

        if name.ends_with(".tex") {
            let inspect = if entry.compress_len < entry.decompress_len {
                let mut raw = vec![0u8; entry.decompress_len as usize];
                if codec::decompress(&payload, &mut raw)? {
                    Some(raw)
                } else {
                    None
                }
            } else if entry.compress_len == entry.decompress_len {
                if tex::needs_fixing(&payload)? {
                    Some(payload.clone())
                } else {
                    None
                }
            } else {
                return Err(DatError::OversizedCompression);
            };

            if let Some(raw) = inspect {
                match tex::fix(&raw)? {
                    Repair::Modified(fixed) => {
                        entry.decompress_len = fixed.len() as u32;
                        payload = match codec::compress(&fixed, options.compression)? {
                            Some(smaller) => smaller,
                            None => fixed,
                        };
                        entry.compress_len = payload.len() as u32;
                        info!("{name} - Patched");
                    }
                    Repair::Unchanged => info!("{name} - Good"),
                }
            }
        }

        entry.data_offset = write_padded(output, &payload)?;
        previous = name;
    }

    // Land the final NUL on the last byte of an alignment granule.
    let end = output.stream_position()?;
    let last = end.div_ceil(ALIGN) * ALIGN - 1;
    output.seek(SeekFrom::Start(last))?;
    output.write_all(&[0])?;

    info!("Writing new file directory");
    output.seek(SeekFrom::Start(TABLE_OFFSET))?;
    for entry in &entries {
        output.write_le(entry)?;
    }

    Ok(())
}

fn read_header<R: Read + Seek>(input: &mut R) -> Result<DatHeader, DatError> {
    let magic: u32 = input.read_le()?;
    let encoding = match magic {
        MAGIC_PLAIN => NameEncoding::Plain,
        MAGIC_PACKED => NameEncoding::Packed,
        _ => return Err(DatError::UnknownFormat),
    };
    Ok(DatHeader {
        encoding,
        num_files: input.read_le()?,
        meta_len: input.read_le()?,
        name_len: input.read_le()?,
    })
}

/// Writes a payload under the alignment rule: data moves up to the next
/// 2048-byte boundary unless it fits entirely in the gap before it. Returns
/// the absolute offset the payload landed on.
fn write_padded<W: Write + Seek>(output: &mut W, data: &[u8]) -> Result<u32, DatError> {
    let pos = output.stream_position()?;
    let pad = (ALIGN - pos % ALIGN) % ALIGN;
    if data.len() as u64 > pad {
        output.seek(SeekFrom::Current(pad as i64))?;
    }
    let offset = output.stream_position()?;
    output.write_all(data)?;
    Ok(offset as u32)
}

/// The 64 characters a packed name unit can decode to. The trailing block of
/// `+` entries never appears in a well-formed archive.
const NAME_CHARS: [u8; 64] = *b"\0 #$()-./?0123456789_abcdefghijklmnopqrstuvwxyz~++++++++++++++++";

struct NameTable {
    encoding: NameEncoding,
    blob: Vec<u8>,
}

impl NameTable {
    fn decode(&self, offset: u32, previous: &str) -> Result<String, DatError> {
        match self.encoding {
            NameEncoding::Plain => self.decode_plain(offset),
            NameEncoding::Packed => self.decode_packed(offset, previous),
        }
    }

    fn decode_plain(&self, offset: u32) -> Result<String, DatError> {
        let tail = self
            .blob
            .get(offset as usize..)
            .ok_or(DatError::NameOutOfBounds)?;
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(DatError::NameOutOfBounds)?;
        Ok(String::from_utf8_lossy(&tail[..len]).into_owned())
    }

    /// One 6-bit unit of a packed name, three blob bytes per four units.
    fn unit(&self, offset: u32, index: u32) -> Result<u8, DatError> {
        let base = offset as usize + 3 * (index as usize / 4);
        let byte = |i: usize| {
            self.blob
                .get(base + i)
                .copied()
                .ok_or(DatError::NameOutOfBounds)
        };
        Ok(match index % 4 {
            0 => byte(0)? & 0x3F,
            1 => ((byte(1)? & 0x0F) << 2) | (byte(0)? >> 6),
            2 => ((byte(2)? & 0x03) << 4) | (byte(1)? >> 4),
            _ => byte(2)? >> 2,
        })
    }

    fn decode_packed(&self, offset: u32, previous: &str) -> Result<String, DatError> {
        let mut index = 0;
        let mut name = String::new();

        // A first unit of 0x30 or above is a delta header `111CBA` `10GFED`
        // reusing the first `0GFEDCBA` characters of the previous name.
        let first = self.unit(offset, 0)?;
        if first >= 0x30 {
            let second = self.unit(offset, 1)?;
            if first & 0x78 != 0x38 || second & 0x70 != 0x20 {
                return Err(DatError::InvalidDeltaPrefix);
            }
            let keep = usize::from(first & 0x07) | (usize::from(second & 0x0F) << 3);
            let prefix = previous.get(..keep).ok_or(DatError::InvalidDeltaPrefix)?;
            name.push_str(prefix);
            index = 2;
        }

        loop {
            let unit = self.unit(offset, index)?;
            index += 1;
            match NAME_CHARS[unit as usize] {
                0 => return Ok(name),
                b'+' => return Err(DatError::InvalidNameChar),
                c => name.push(char::from(c)),
            }
        }
    }
}
