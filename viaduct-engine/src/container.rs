//! Tar-framed on-disk container (§4.A).
//!
//! Every persisted index lives inside one archive of named binary blocks.
//! The archive is literally USTAR-compatible (so `tar tvf` can list it),
//! matching `include/storage/tar.hpp` in the source this module is ported
//! from: a fixed-size header per block (name, size, checksum), the body
//! padded up to the next 512-byte boundary, and two all-zero blocks as the
//! end-of-archive marker. Block names are slash-separated paths such as
//! `/mld/metrics/0/weights`.
//!
//! Writers prepend the fingerprint block automatically; readers must call
//! [`ContainerReader::read_and_check_fingerprint`] before trusting anything
//! else in the archive.

use std::io::{self, Read, Write};

use viaduct_common::{Error, ErrorCode, Result};

const BLOCK_SIZE: usize = 512;
const NAME_FIELD: usize = 100;

/// Magic bytes identifying a viaduct container, stored as the first 4 bytes
/// of the `osrm_fingerprint` block's content (the block name is kept as-is
/// for on-disk compatibility with the format this container descends from).
const FINGERPRINT_MAGIC: [u8; 4] = *b"VDCT";
const FINGERPRINT_BLOCK: &str = "osrm_fingerprint";

/// The container format version written by this build. Two containers are
/// compatible iff major and minor match; patch is free to vary.
pub const FORMAT_MAJOR: u32 = 1;
pub const FORMAT_MINOR: u32 = 0;
pub const FORMAT_PATCH: u32 = 0;

/// `{major, minor, patch}` plus the magic constant, stored at the head of
/// every container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub magic: [u8; 4],
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Fingerprint {
    pub fn current() -> Self {
        Fingerprint {
            magic: FINGERPRINT_MAGIC,
            major: FORMAT_MAJOR,
            minor: FORMAT_MINOR,
            patch: FORMAT_PATCH,
        }
    }

    fn to_bytes(self) -> [u8; 20] {
        let mut out = [0u8; 20];
        out[0..4].copy_from_slice(&self.magic);
        out[4..8].copy_from_slice(&self.major.to_le_bytes());
        out[8..12].copy_from_slice(&self.minor.to_le_bytes());
        out[12..16].copy_from_slice(&self.patch.to_le_bytes());
        // Last 4 bytes reserved, kept zero; matches the fixed 20-byte
        // on-disk record (8 bytes magic+reserved, 3x uint32 version).
        out
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 20 {
            return Err(Error::new(
                ErrorCode::InvalidFingerprint,
                "fingerprint block is truncated",
            ));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Fingerprint {
            magic,
            major: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            minor: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            patch: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
        })
    }

    /// `major==major && minor==minor`; patch is free.
    pub fn compatible_with(&self, other: &Fingerprint) -> bool {
        self.magic == other.magic && self.major == other.major && self.minor == other.minor
    }
}

/// A value that can be read/written as a fixed-size little-endian record.
/// Readers validate `size == n * SIZE` against this before trusting the
/// byte count (§4.A: "fail with `DatatypeSizeMismatch` otherwise").
pub trait BinaryRecord: Sized {
    const SIZE: usize;
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(&self, out: &mut Vec<u8>);
}

impl BinaryRecord for u32 {
    const SIZE: usize = 4;
    fn read_le(bytes: &[u8]) -> Self {
        u32::from_le_bytes(bytes[..4].try_into().unwrap())
    }
    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl BinaryRecord for u64 {
    const SIZE: usize = 8;
    fn read_le(bytes: &[u8]) -> Self {
        u64::from_le_bytes(bytes[..8].try_into().unwrap())
    }
    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl BinaryRecord for i32 {
    const SIZE: usize = 4;
    fn read_le(bytes: &[u8]) -> Self {
        i32::from_le_bytes(bytes[..4].try_into().unwrap())
    }
    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

fn block_checksum(header: &[u8; BLOCK_SIZE]) -> u32 {
    // USTAR checksum: sum of header bytes with the checksum field itself
    // treated as eight ASCII spaces.
    let mut sum: u32 = 0;
    for (i, &b) in header.iter().enumerate() {
        if (148..156).contains(&i) {
            sum += b' ' as u32;
        } else {
            sum += b as u32;
        }
    }
    sum
}

fn make_header(name: &str, size: u64) -> io::Result<[u8; BLOCK_SIZE]> {
    let mut header = [0u8; BLOCK_SIZE];
    let name_bytes = name.as_bytes();
    if name_bytes.len() > NAME_FIELD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "block name exceeds 100 bytes",
        ));
    }
    header[0..name_bytes.len()].copy_from_slice(name_bytes);
    // mode field (100..108): "0000644\0"
    header[100..108].copy_from_slice(b"0000644\0");
    // uid/gid: zero, octal
    header[108..116].copy_from_slice(b"0000000\0");
    header[116..124].copy_from_slice(b"0000000\0");
    let size_octal = format!("{:011o}\0", size);
    header[124..136].copy_from_slice(size_octal.as_bytes());
    header[136..148].copy_from_slice(b"00000000000\0");
    // typeflag '0' = regular file
    header[156] = b'0';
    header[257..263].copy_from_slice(b"ustar\0");
    header[263..265].copy_from_slice(b"00");
    let checksum = block_checksum(&header);
    let checksum_str = format!("{:06o}\0 ", checksum);
    header[148..156].copy_from_slice(checksum_str.as_bytes());
    Ok(header)
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// Writes named blocks to an archive, prepending the fingerprint block on
/// construction.
pub struct ContainerWriter<W: Write> {
    out: W,
}

impl<W: Write> ContainerWriter<W> {
    pub fn create(mut out: W) -> Result<Self> {
        write_block(&mut out, FINGERPRINT_BLOCK, &Fingerprint::current().to_bytes())
            .map_err(|e| Error::internal(format!("writing fingerprint block: {e}")))?;
        Ok(ContainerWriter { out })
    }

    pub fn write_block(&mut self, name: &str, data: &[u8]) -> Result<()> {
        write_block(&mut self.out, name, data)
            .map_err(|e| Error::internal(format!("writing block {name}: {e}")))
    }

    /// Writes a dense array, element-count-prefixed as a `uint64` per §6.
    pub fn write_array<T: BinaryRecord>(&mut self, name: &str, items: &[T]) -> Result<()> {
        let mut buf = Vec::with_capacity(8 + items.len() * T::SIZE);
        (items.len() as u64).write_le(&mut buf);
        for item in items {
            item.write_le(&mut buf);
        }
        self.write_block(name, &buf)
    }

    /// Finalizes the archive: two all-zero end-of-archive blocks, flushed.
    pub fn finish(mut self) -> Result<W> {
        self.out
            .write_all(&[0u8; BLOCK_SIZE * 2])
            .map_err(|e| Error::internal(format!("writing archive trailer: {e}")))?;
        self.out
            .flush()
            .map_err(|e| Error::internal(format!("flushing archive: {e}")))?;
        Ok(self.out)
    }
}

fn write_block<W: Write>(out: &mut W, name: &str, data: &[u8]) -> io::Result<()> {
    let header = make_header(name, data.len() as u64)?;
    out.write_all(&header)?;
    out.write_all(data)?;
    let pad = padded_len(data.len()) - data.len();
    if pad > 0 {
        out.write_all(&vec![0u8; pad])?;
    }
    Ok(())
}

/// A fully-parsed archive held in memory, addressable by block name.
///
/// Containers are loaded once at process start (§3 Lifecycle) so reading
/// eagerly into memory (rather than seeking lazily) matches how the data is
/// actually used.
pub struct ContainerReader {
    blocks: Vec<(String, Vec<u8>)>,
}

impl ContainerReader {
    pub fn open<R: Read>(mut input: R) -> Result<Self> {
        let mut bytes = Vec::new();
        input
            .read_to_end(&mut bytes)
            .map_err(|e| Error::internal(format!("reading container: {e}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut blocks = Vec::new();
        let mut offset = 0usize;
        while offset + BLOCK_SIZE <= bytes.len() {
            let header = &bytes[offset..offset + BLOCK_SIZE];
            if header.iter().all(|&b| b == 0) {
                break;
            }
            let name_end = header[..NAME_FIELD]
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(NAME_FIELD);
            let name = String::from_utf8_lossy(&header[..name_end]).into_owned();
            let size_field = std::str::from_utf8(&header[124..136])
                .map_err(|_| Error::internal("corrupt tar header: non-utf8 size field"))?;
            let size = u64::from_str_radix(size_field.trim_end_matches('\0').trim(), 8)
                .map_err(|_| Error::internal("corrupt tar header: bad octal size"))?
                as usize;
            offset += BLOCK_SIZE;
            if offset + size > bytes.len() {
                return Err(Error::internal("corrupt tar archive: truncated body"));
            }
            let body = bytes[offset..offset + size].to_vec();
            offset += padded_len(size);
            blocks.push((name, body));
        }
        Ok(ContainerReader { blocks })
    }

    fn find(&self, name: &str) -> Option<&[u8]> {
        self.blocks
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b.as_slice())
    }

    pub fn list(&self) -> Vec<(String, usize)> {
        self.blocks.iter().map(|(n, b)| (n.clone(), b.len())).collect()
    }

    /// Validates the fingerprint and the `major==major && minor==minor`
    /// compatibility rule, per `TarFileReader::ReadAndCheckFingerprint`.
    pub fn read_and_check_fingerprint(&self) -> Result<Fingerprint> {
        let bytes = self
            .find(FINGERPRINT_BLOCK)
            .ok_or_else(|| Error::new(ErrorCode::InvalidFingerprint, "missing fingerprint block"))?;
        let found = Fingerprint::from_bytes(bytes)?;
        let expected = Fingerprint::current();
        if found.magic != expected.magic {
            return Err(Error::new(ErrorCode::InvalidFingerprint, "bad magic constant"));
        }
        if !found.compatible_with(&expected) {
            return Err(Error::new(
                ErrorCode::IncompatibleFileVersion,
                format!(
                    "container version {}.{}.{} is incompatible with reader version {}.{}.{}",
                    found.major, found.minor, found.patch, expected.major, expected.minor, expected.patch
                ),
            ));
        }
        Ok(found)
    }

    /// Reads a single fixed-size record.
    pub fn read_one<T: BinaryRecord>(&self, name: &str) -> Result<T> {
        let bytes = self
            .find(name)
            .ok_or_else(|| Error::internal(format!("missing block {name}")))?;
        if bytes.len() != T::SIZE {
            return Err(Error::new(
                ErrorCode::DatatypeSizeMismatch,
                format!("block {name}: expected {} bytes, found {}", T::SIZE, bytes.len()),
            ));
        }
        Ok(T::read_le(bytes))
    }

    /// Reads a dense, element-count-prefixed array written by
    /// [`ContainerWriter::write_array`].
    pub fn read_array<T: BinaryRecord>(&self, name: &str) -> Result<Vec<T>> {
        let bytes = self
            .find(name)
            .ok_or_else(|| Error::internal(format!("missing block {name}")))?;
        if bytes.len() < 8 {
            return Err(Error::new(
                ErrorCode::DatatypeSizeMismatch,
                format!("block {name}: missing element count prefix"),
            ));
        }
        let n = u64::read_le(&bytes[..8]) as usize;
        let expected = 8 + n * T::SIZE;
        if bytes.len() != expected {
            return Err(Error::new(
                ErrorCode::DatatypeSizeMismatch,
                format!(
                    "block {name}: size {} does not match {n} elements of {} bytes",
                    bytes.len(),
                    T::SIZE
                ),
            ));
        }
        let mut items = Vec::with_capacity(n);
        let mut off = 8;
        for _ in 0..n {
            items.push(T::read_le(&bytes[off..off + T::SIZE]));
            off += T::SIZE;
        }
        Ok(items)
    }

    /// Raw, unvalidated bytes of a block, for formats this module does not
    /// itself decode (e.g. the name table's own framing).
    pub fn read_into(&self, name: &str, n: usize, elem_size: usize) -> Result<&[u8]> {
        let bytes = self
            .find(name)
            .ok_or_else(|| Error::internal(format!("missing block {name}")))?;
        if bytes.len() != n * elem_size {
            return Err(Error::new(
                ErrorCode::DatatypeSizeMismatch,
                format!(
                    "block {name}: expected {} bytes ({n} x {elem_size}), found {}",
                    n * elem_size,
                    bytes.len()
                ),
            ));
        }
        Ok(bytes)
    }

    pub fn raw_block(&self, name: &str) -> Result<&[u8]> {
        self.find(name)
            .ok_or_else(|| Error::internal(format!("missing block {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_blocks_by_name() {
        let mut buf = Vec::new();
        let mut writer = ContainerWriter::create(&mut buf).unwrap();
        writer.write_block("/common/names/values", b"hello world").unwrap();
        writer.write_array("/common/node_ids", &[1u32, 2, 3]).unwrap();
        writer.finish().unwrap();

        let reader = ContainerReader::open(buf.as_slice()).unwrap();
        reader.read_and_check_fingerprint().unwrap();
        assert_eq!(reader.raw_block("/common/names/values").unwrap(), b"hello world");
        assert_eq!(reader.read_array::<u32>("/common/node_ids").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn fingerprint_rejects_incompatible_minor() {
        let older = Fingerprint {
            magic: FINGERPRINT_MAGIC,
            major: FORMAT_MAJOR,
            minor: FORMAT_MINOR + 1,
            patch: 0,
        };
        assert!(!Fingerprint::current().compatible_with(&older));
    }

    #[test]
    fn fingerprint_allows_patch_drift() {
        let patched = Fingerprint {
            magic: FINGERPRINT_MAGIC,
            major: FORMAT_MAJOR,
            minor: FORMAT_MINOR,
            patch: FORMAT_PATCH + 7,
        };
        assert!(Fingerprint::current().compatible_with(&patched));
    }

    #[test]
    fn array_size_mismatch_is_reported() {
        let mut buf = Vec::new();
        let mut writer = ContainerWriter::create(&mut buf).unwrap();
        // Write a raw, deliberately malformed array block.
        let mut bad = Vec::new();
        (3u64).write_le(&mut bad);
        bad.extend_from_slice(&[0u8; 4]); // only one element's worth of bytes
        writer.write_block("/bad", &bad).unwrap();
        writer.finish().unwrap();

        let reader = ContainerReader::open(buf.as_slice()).unwrap();
        let err = reader.read_array::<u32>("/bad").unwrap_err();
        assert_eq!(err.code, ErrorCode::DatatypeSizeMismatch);
    }

    #[test]
    fn list_reports_all_blocks() {
        let mut buf = Vec::new();
        let mut writer = ContainerWriter::create(&mut buf).unwrap();
        writer.write_block("/a", b"x").unwrap();
        writer.write_block("/b", b"yy").unwrap();
        writer.finish().unwrap();

        let reader = ContainerReader::open(buf.as_slice()).unwrap();
        let names: Vec<_> = reader.list().into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&FINGERPRINT_BLOCK.to_string()));
        assert!(names.contains(&"/a".to_string()));
        assert!(names.contains(&"/b".to_string()));
    }
}
