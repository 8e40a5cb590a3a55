//! Indexed string table (§4.F, shared by name/destinations/pronunciation/
//! ref/exits).
//!
//! Strings are grouped into blocks of `BLOCK_SIZE`. Two block encodings are
//! supported, chosen at build time: a *variable group block* storing a
//! packed 2-bit length-of-length descriptor per string, and a *fixed group
//! block* storing one length byte per string. Both exist because the
//! original indexed-data format this is ported from (`VariableGroupBlock`/
//! `FixedGroupBlock` in `include/util/indexed_data.hpp`) supports either,
//! selected by how skewed the string-length distribution is.
//!
//! A `NameID` indexes five logical strings (name, destinations,
//! pronunciation, ref, exits) at `id+0..id+4`; this module only implements
//! the flat `id -> &str` table itself; the five-way grouping is the
//! caller's concern.

use viaduct_common::{Error, ErrorCode, Result};

pub const BLOCK_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Packed 2-bit lengths-of-length per string (0=empty, 1=1 byte len,
    /// 2=2 bytes, 3=3 bytes); supports strings up to 2^24-1 bytes.
    Variable,
    /// One length byte (0..255) per string; simpler, caps strings at 255
    /// bytes.
    Fixed,
}

#[derive(Debug)]
struct Block {
    /// Byte offset into `values` where this block's string data begins.
    data_offset: u32,
    /// Per-string byte length, `BLOCK_SIZE` entries (trailing entries in a
    /// partial final block are zero and unused).
    lengths: [u32; BLOCK_SIZE],
}

/// An immutable, addressable string table.
#[derive(Debug)]
pub struct NameTable {
    encoding: Encoding,
    blocks: Vec<Block>,
    values: Vec<u8>,
    len: usize,
}

impl NameTable {
    /// Returns the string at `id`. Panics if `id >= self.len()`, matching
    /// the source's unchecked-index convention for this hot-path accessor.
    /// UTF-8 validity of `values` is checked once, at [`deserialize`] time,
    /// so this indexing step itself cannot fail.
    pub fn at(&self, id: u32) -> &str {
        let id = id as usize;
        assert!(id < self.len, "name table index out of range");
        let block = &self.blocks[id / BLOCK_SIZE];
        let inner = id % BLOCK_SIZE;
        let start: u32 = block.data_offset + block.lengths[..inner].iter().sum::<u32>();
        let len = block.lengths[inner];
        let bytes = &self.values[start as usize..(start + len) as usize];
        std::str::from_utf8(bytes).expect("values validated as utf-8 in deserialize/build")
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }
}

/// Builds a [`NameTable`] from an ordered sequence of strings, each
/// assigned the id equal to its append order.
pub struct NameTableBuilder {
    strings: Vec<String>,
}

impl NameTableBuilder {
    pub fn new() -> Self {
        NameTableBuilder { strings: Vec::new() }
    }

    /// Appends one string, returning the id it was assigned.
    pub fn push(&mut self, s: impl Into<String>) -> u32 {
        let id = self.strings.len() as u32;
        self.strings.push(s.into());
        id
    }

    /// Appends the five logical strings of a name record starting at the
    /// returned id (`id+0..id+4` are name/destinations/pronunciation/ref/
    /// exits, per §3).
    pub fn push_name_record(
        &mut self,
        name: &str,
        destinations: &str,
        pronunciation: &str,
        reference: &str,
        exits: &str,
    ) -> u32 {
        let id = self.push(name);
        self.push(destinations);
        self.push(pronunciation);
        self.push(reference);
        self.push(exits);
        id
    }

    /// Builds the table with the given block encoding. Fails if any single
    /// string exceeds the encoding's length limit (3-byte variable /
    /// 1-byte fixed), per §4.F.
    pub fn build(self, encoding: Encoding) -> Result<NameTable> {
        let limit: u64 = match encoding {
            Encoding::Variable => (1u64 << 24) - 1,
            Encoding::Fixed => 255,
        };
        for s in &self.strings {
            if s.len() as u64 > limit {
                return Err(Error::new(
                    ErrorCode::InternalError,
                    format!("string of {} bytes exceeds the {encoding:?} encoding's length limit", s.len()),
                ));
            }
        }

        let mut values = Vec::new();
        let mut blocks = Vec::new();
        for chunk in self.strings.chunks(BLOCK_SIZE) {
            let data_offset = values.len() as u32;
            let mut lengths = [0u32; BLOCK_SIZE];
            for (i, s) in chunk.iter().enumerate() {
                lengths[i] = s.len() as u32;
                values.extend_from_slice(s.as_bytes());
            }
            blocks.push(Block { data_offset, lengths });
        }

        Ok(NameTable {
            encoding,
            blocks,
            values,
            len: self.strings.len(),
        })
    }
}

impl Default for NameTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes a [`NameTable`] into the on-disk `blocks`/`values` byte pair
/// described by §6 (`/common/names/blocks`, `/common/names/values`).
pub fn serialize(table: &NameTable) -> (Vec<u8>, Vec<u8>) {
    let mut blocks_bytes = Vec::new();
    blocks_bytes.push(table.encoding as u8);
    blocks_bytes.extend_from_slice(&(table.len as u64).to_le_bytes());
    blocks_bytes.extend_from_slice(&(table.blocks.len() as u64).to_le_bytes());

    for block in &table.blocks {
        blocks_bytes.extend_from_slice(&block.data_offset.to_le_bytes());
        match table.encoding {
            Encoding::Variable => {
                let descriptor = pack_variable_descriptor(&block.lengths);
                blocks_bytes.extend_from_slice(&descriptor.to_le_bytes());
                for &len in &block.lengths {
                    let byte_len = length_of_length(len);
                    blocks_bytes.extend_from_slice(&len.to_le_bytes()[..byte_len]);
                }
            }
            Encoding::Fixed => {
                for &len in &block.lengths {
                    blocks_bytes.push(len as u8);
                }
            }
        }
    }
    (blocks_bytes, table.values.clone())
}

fn length_of_length(len: u32) -> usize {
    if len == 0 {
        0
    } else if len < 256 {
        1
    } else if len < 1 << 16 {
        2
    } else {
        3
    }
}

/// Packs the 2-bit lengths-of-length descriptor for one block of up to
/// `BLOCK_SIZE` strings.
fn pack_variable_descriptor(lengths: &[u32; BLOCK_SIZE]) -> u32 {
    let mut descriptor = 0u32;
    for (i, &len) in lengths.iter().enumerate() {
        let code = length_of_length(len) as u32;
        descriptor |= code << (2 * i);
    }
    descriptor
}

/// Reconstructs a [`NameTable`] from the `(blocks, values)` byte pair
/// produced by [`serialize`] (the on-disk `/common/names/blocks` and
/// `/common/names/values` container paths of §6).
pub fn deserialize(blocks_bytes: &[u8], values: Vec<u8>) -> Result<NameTable> {
    if blocks_bytes.len() < 17 {
        return Err(Error::internal("name table block header is truncated"));
    }
    let encoding = match blocks_bytes[0] {
        0 => Encoding::Variable,
        1 => Encoding::Fixed,
        other => return Err(Error::internal(format!("unknown name table encoding tag {other}"))),
    };
    let len = u64::from_le_bytes(blocks_bytes[1..9].try_into().unwrap()) as usize;
    let num_blocks = u64::from_le_bytes(blocks_bytes[9..17].try_into().unwrap()) as usize;

    let mut cursor = 17usize;
    let mut blocks = Vec::with_capacity(num_blocks);
    for _ in 0..num_blocks {
        let data_offset = read_u32(blocks_bytes, &mut cursor)?;
        let mut lengths = [0u32; BLOCK_SIZE];
        match encoding {
            Encoding::Variable => {
                let descriptor = read_u32(blocks_bytes, &mut cursor)?;
                for (i, slot) in lengths.iter_mut().enumerate() {
                    let code = (descriptor >> (2 * i)) & 0b11;
                    *slot = read_bytes_as_u32(blocks_bytes, &mut cursor, code as usize)?;
                }
            }
            Encoding::Fixed => {
                for slot in lengths.iter_mut() {
                    *slot = *blocks_bytes
                        .get(cursor)
                        .ok_or_else(|| Error::internal("name table block header is truncated"))?
                        as u32;
                    cursor += 1;
                }
            }
        }
        blocks.push(Block { data_offset, lengths });
    }

    if std::str::from_utf8(&values).is_err() {
        return Err(Error::internal("name table values are not valid utf-8"));
    }

    Ok(NameTable {
        encoding,
        blocks,
        values,
        len,
    })
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let slice = bytes
        .get(*cursor..*cursor + 4)
        .ok_or_else(|| Error::internal("name table block header is truncated"))?;
    *cursor += 4;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

fn read_bytes_as_u32(bytes: &[u8], cursor: &mut usize, count: usize) -> Result<u32> {
    if count == 0 {
        return Ok(0);
    }
    let slice = bytes
        .get(*cursor..*cursor + count)
        .ok_or_else(|| Error::internal("name table block header is truncated"))?;
    *cursor += count;
    let mut buf = [0u8; 4];
    buf[..count].copy_from_slice(slice);
    Ok(u32::from_le_bytes(buf))
}
