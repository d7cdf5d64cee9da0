//! Snappy-format block compression.
//!
//! A compressed block is a little-endian base-128 varint holding the
//! uncompressed length, followed by a stream of elements. Every element
//! starts with a tag byte whose two low bits select the element kind:
//!
//! * `00` literal: the next `len` input bytes are copied to the output.
//!   Lengths up to 60 are stored in the tag, longer ones in 1-4 trailing
//!   little-endian bytes.
//! * `01` copy with a 1-byte offset: length 4-11, 11-bit offset.
//! * `10` copy with a 2-byte offset: length 1-64, 16-bit offset.
//! * `11` copy with a 4-byte offset: length 1-64, 32-bit offset.
//!
//! The decoder is driven by [`TAG_TABLE`] and checks every read and every
//! back-reference against the buffers, reporting malformed input as a
//! [`CompressionError`].

use super::frame_errors::CompressionError;

const BLOCK_SIZE: usize = 1 << 16;
const MAX_TABLE_SIZE: usize = 1 << 14;
const MIN_TABLE_SIZE: usize = 1 << 8;

/// Blocks shorter than this are emitted as a single literal.
const MIN_NON_LITERAL_BLOCK_SIZE: usize = 1 + 1 + INPUT_MARGIN;

/// Bytes at the end of a block that are never the start of a match, so that
/// the matcher can always load 8 bytes without a bounds check failing.
const INPUT_MARGIN: usize = 16 - 1;

const MAX_HEADER_LEN: usize = 5;

/// Upper bound of the expansion ratio: a 3-byte copy tag yields 64 bytes.
const MAX_EXPANSION: usize = 22;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TagKind {
    Literal,
    Copy,
}

#[derive(Clone, Copy, Debug)]
struct TagEntry {
    kind: TagKind,
    /// Element length, or 0 for literals whose length follows in `trailing` bytes.
    len: u8,
    /// Number of bytes after the tag holding the literal length or copy offset.
    trailing: u8,
    /// Offset bits carried by the tag itself (copies with a 1-byte offset).
    offset_high: u16,
}

const fn build_tag_table() -> [TagEntry; 256] {
    let mut table = [TagEntry {
        kind: TagKind::Literal,
        len: 0,
        trailing: 0,
        offset_high: 0,
    }; 256];
    let mut tag = 0;
    while tag < 256 {
        let upper = (tag >> 2) as u8;
        table[tag] = match tag & 0b11 {
            0b00 if upper < 60 => TagEntry {
                kind: TagKind::Literal,
                len: upper + 1,
                trailing: 0,
                offset_high: 0,
            },
            0b00 => TagEntry {
                kind: TagKind::Literal,
                len: 0,
                trailing: upper - 59,
                offset_high: 0,
            },
            0b01 => TagEntry {
                kind: TagKind::Copy,
                len: 4 + (upper & 0b111),
                trailing: 1,
                offset_high: ((tag >> 5) as u16) << 8,
            },
            0b10 => TagEntry {
                kind: TagKind::Copy,
                len: upper + 1,
                trailing: 2,
                offset_high: 0,
            },
            _ => TagEntry {
                kind: TagKind::Copy,
                len: upper + 1,
                trailing: 4,
                offset_high: 0,
            },
        };
        tag += 1;
    }
    table
}

static TAG_TABLE: [TagEntry; 256] = build_tag_table();

/// Worst-case size of the compressed form of `input_len` bytes.
pub fn max_compressed_len(input_len: usize) -> usize {
    32 + input_len + input_len / 6
}

/// Compresses `input` and appends the result to `output`.
///
/// Returns the number of bytes appended.
pub fn compress_into(input: &[u8], output: &mut Vec<u8>) -> Result<usize, CompressionError> {
    let declared: u32 = input
        .len()
        .try_into()
        .map_err(|_| CompressionError::InputTooLarge(input.len()))?;

    let start = output.len();
    output.reserve(max_compressed_len(input.len()));
    write_varint(declared, output);

    let mut table = vec![0u16; MAX_TABLE_SIZE];
    for block in input.chunks(BLOCK_SIZE) {
        compress_block(block, &mut table, output);
    }
    Ok(output.len() - start)
}

pub fn compress(input: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut output = Vec::new();
    compress_into(input, &mut output)?;
    Ok(output)
}

/// Reads the uncompressed length from the header of a compressed block.
///
/// Lengths that the rest of the block could never produce are rejected.
pub fn decompress_len(input: &[u8]) -> Result<usize, CompressionError> {
    let (declared, header_len) = read_header(input)?;
    let available = input.len() - header_len;
    if declared > available.saturating_mul(MAX_EXPANSION) {
        return Err(CompressionError::ImpossibleLength {
            declared,
            available,
        });
    }
    Ok(declared)
}

/// Decompresses `input` and appends the result to `output`.
///
/// Returns the number of bytes appended. On error, `output` may hold a
/// partially decompressed prefix past its original length.
pub fn decompress_into(input: &[u8], output: &mut Vec<u8>) -> Result<usize, CompressionError> {
    let declared = decompress_len(input)?;
    let (_, header_len) = read_header(input)?;

    let base = output.len();
    output.reserve(declared);

    let mut pos = header_len;
    while pos < input.len() {
        let entry = TAG_TABLE[input[pos] as usize];
        let trailing = input
            .get(pos + 1..pos + 1 + entry.trailing as usize)
            .ok_or(CompressionError::TruncatedTag { at: pos })?;
        let produced = output.len() - base;

        match entry.kind {
            TagKind::Literal => {
                let len = if entry.trailing == 0 {
                    entry.len as usize
                } else {
                    (read_le(trailing) as usize).saturating_add(1)
                };
                let start = pos + 1 + trailing.len();
                let literal = start
                    .checked_add(len)
                    .and_then(|end| input.get(start..end))
                    .ok_or(CompressionError::TruncatedLiteral { at: start, len })?;
                if produced + len > declared {
                    return Err(CompressionError::OutputOverflow { declared });
                }
                output.extend_from_slice(literal);
                pos = start + len;
            }
            TagKind::Copy => {
                let len = entry.len as usize;
                let offset = (entry.offset_high as usize) | read_le(trailing) as usize;
                if offset == 0 || offset > produced {
                    return Err(CompressionError::InvalidOffset { offset, produced });
                }
                if produced + len > declared {
                    return Err(CompressionError::OutputOverflow { declared });
                }
                let from = output.len() - offset;
                if offset >= len {
                    output.extend_from_within(from..from + len);
                } else {
                    // The source overlaps the bytes being written.
                    for i in from..from + len {
                        let byte = output[i];
                        output.push(byte);
                    }
                }
                pos += 1 + trailing.len();
            }
        }
    }

    let produced = output.len() - base;
    if produced != declared {
        return Err(CompressionError::LengthMismatch { declared, produced });
    }
    Ok(produced)
}

pub fn decompress(input: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut output = Vec::new();
    decompress_into(input, &mut output)?;
    Ok(output)
}

fn read_header(input: &[u8]) -> Result<(usize, usize), CompressionError> {
    let mut value: u64 = 0;
    for i in 0..MAX_HEADER_LEN {
        let byte = *input.get(i).ok_or(CompressionError::TruncatedHeader)?;
        // The fifth byte may only carry the 4 top bits of a u32.
        if i == MAX_HEADER_LEN - 1 && byte > 0x0f {
            return Err(CompressionError::HeaderOverflow);
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte < 0x80 {
            return Ok((value as usize, i + 1));
        }
    }
    Err(CompressionError::HeaderOverflow)
}

fn write_varint(mut value: u32, output: &mut Vec<u8>) {
    while value >= 0x80 {
        output.push((value as u8) | 0x80);
        value >>= 7;
    }
    output.push(value as u8);
}

fn read_le(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .rev()
        .fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
}

fn load32(src: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([src[at], src[at + 1], src[at + 2], src[at + 3]])
}

fn load64(src: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&src[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn hash(bytes: u32, shift: u32) -> usize {
    (bytes.wrapping_mul(0x1e35_a7bd) >> shift) as usize
}

/// Compresses one block of at most [`BLOCK_SIZE`] bytes. Positions stored in
/// the hash table are relative to the block, so they fit in a `u16`.
fn compress_block(src: &[u8], table: &mut [u16], output: &mut Vec<u8>) {
    if src.len() < MIN_NON_LITERAL_BLOCK_SIZE {
        emit_literal(src, output);
        return;
    }

    let table_size = src
        .len()
        .next_power_of_two()
        .clamp(MIN_TABLE_SIZE, MAX_TABLE_SIZE);
    let shift = 32 - table_size.trailing_zeros();
    let table = &mut table[..table_size];
    table.fill(0);

    let s_limit = src.len() - INPUT_MARGIN;
    let mut next_emit = 0;
    let mut s = 1;
    let mut next_hash = hash(load32(src, s), shift);

    'blocks: loop {
        // Scan forward for a 4-byte match, skipping faster the longer
        // nothing is found.
        let mut skip = 32;
        let mut next_s = s;
        let mut candidate;
        loop {
            s = next_s;
            let bytes_between = skip >> 5;
            skip += bytes_between;
            next_s = s + bytes_between;
            if next_s > s_limit {
                break 'blocks;
            }
            candidate = table[next_hash] as usize;
            table[next_hash] = s as u16;
            next_hash = hash(load32(src, next_s), shift);
            if load32(src, s) == load32(src, candidate) {
                break;
            }
        }

        emit_literal(&src[next_emit..s], output);

        // Emit copies as long as the byte right after one match starts another.
        loop {
            let base = s;
            s += 4;
            let mut i = candidate + 4;
            while s < src.len() && src[i] == src[s] {
                i += 1;
                s += 1;
            }
            emit_copy(base - candidate, s - base, output);
            next_emit = s;
            if s >= s_limit {
                break 'blocks;
            }

            let x = load64(src, s - 1);
            let prev_hash = hash(x as u32, shift);
            table[prev_hash] = (s - 1) as u16;
            let cur_hash = hash((x >> 8) as u32, shift);
            candidate = table[cur_hash] as usize;
            table[cur_hash] = s as u16;
            if (x >> 8) as u32 != load32(src, candidate) {
                next_hash = hash((x >> 16) as u32, shift);
                s += 1;
                break;
            }
        }
    }

    if next_emit < src.len() {
        emit_literal(&src[next_emit..], output);
    }
}

fn emit_literal(literal: &[u8], output: &mut Vec<u8>) {
    if literal.is_empty() {
        return;
    }
    let n = literal.len() - 1;
    if n < 60 {
        output.push((n as u8) << 2);
    } else {
        let extra = match n {
            0..=0xff => 1,
            0x100..=0xffff => 2,
            0x1_0000..=0xff_ffff => 3,
            _ => 4,
        };
        output.push((59 + extra as u8) << 2);
        output.extend_from_slice(&(n as u32).to_le_bytes()[..extra]);
    }
    output.extend_from_slice(literal);
}

fn emit_copy(offset: usize, mut len: usize, output: &mut Vec<u8>) {
    while len >= 68 {
        emit_copy2(offset, 64, output);
        len -= 64;
    }
    if len > 64 {
        emit_copy2(offset, 60, output);
        len -= 60;
    }
    if len >= 12 || offset >= 2048 {
        emit_copy2(offset, len, output);
    } else {
        output.push((((offset >> 8) as u8) << 5) | (((len - 4) as u8) << 2) | 0b01);
        output.push(offset as u8);
    }
}

fn emit_copy2(offset: usize, len: usize, output: &mut Vec<u8>) {
    output.push((((len - 1) as u8) << 2) | 0b10);
    output.extend_from_slice(&(offset as u16).to_le_bytes());
}
