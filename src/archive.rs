//! # On-Disk Candidate-Vector Archive
//!
//! Bit-exact persistence for explored candidate vectors, so runs can be
//! replayed, diffed or consumed by other tooling.
//!
//! ## Full format
//!
//! ```text
//! header:  u64 total vector count | u32 vector length | u32 bits per element
//! record:  vector_len elements of bits_per_elem bits, then 1 passed bit
//! ```
//!
//! Multi-byte integers are little-endian. Elements are packed LSB-first and
//! each record is padded to a whole byte, so records have a fixed width and
//! the archive is seekable. `bits_per_elem` is the minimal width for the
//! state space's largest domain index ([`minimal_bits`]).
//!
//! ## Delta format
//!
//! Every `ratio`-th vector (including the first) goes to the primary file as
//! a full record; every other step goes to a companion file as one tagged
//! difference record:
//!
//! | tag | payload | meaning |
//! |-----|---------------------------|--------------------------------------|
//! | 1 | `u32 addr` | `v[addr] += 1` |
//! | 2 | `u32 addr, u64 value` | `v[addr] = value` |
//! | 3 | `u32 addr` | `v[addr] += 1`, zero all above |
//! | 4 | `u32 addr, u64 value` | `v[addr] = value`, zero all above |
//! | 5 | `u32 n, n x (u32, u64)` | explicit address/value list |
//!
//! Each difference record ends with a `u8` passed flag. Tag 5 is the
//! fallback when more than one interior address changes arbitrarily; tags 3
//! and 4 match the shape the search engine's advance step produces, which is
//! why most steps compress to five bytes.
//!
//! Archive writes sit at a collaborator boundary: [`ArchiveListener`] warns
//! and stops archiving on I/O failure instead of aborting the run.

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::engine::{RunStats, SearchListener, Step};
use crate::space::StateSpace;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("vector length mismatch: archive holds {expected}-element vectors, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("element value {value} does not fit in {bits} bits")]
    ElementOverflow { value: usize, bits: u32 },

    #[error("corrupt archive: {0}")]
    Corrupt(String),
}

/// Minimal bits-per-element width for vectors over this state space.
pub fn minimal_bits(space: &StateSpace) -> u32 {
    bits_for(space.max_domain_index())
}

fn bits_for(max_index: usize) -> u32 {
    if max_index == 0 {
        1
    } else {
        64 - (max_index as u64).leading_zeros()
    }
}

fn record_bytes(vector_len: usize, bits: u32) -> usize {
    (vector_len * bits as usize + 1 + 7) / 8
}

fn put_bits(buf: &mut [u8], pos: usize, value: u64, width: u32) {
    for i in 0..width as usize {
        if value >> i & 1 == 1 {
            buf[(pos + i) / 8] |= 1 << ((pos + i) % 8);
        }
    }
}

fn get_bits(buf: &[u8], pos: usize, width: u32) -> u64 {
    let mut value = 0u64;
    for i in 0..width as usize {
        if buf[(pos + i) / 8] >> ((pos + i) % 8) & 1 == 1 {
            value |= 1 << i;
        }
    }
    value
}

fn pack_record(
    vector: &[usize],
    passed: bool,
    bits: u32,
    buf: &mut Vec<u8>,
) -> Result<(), ArchiveError> {
    buf.clear();
    buf.resize(record_bytes(vector.len(), bits), 0);
    let limit = if bits >= 64 { u64::MAX } else { (1 << bits) - 1 };
    let mut pos = 0;
    for &value in vector {
        if value as u64 > limit {
            return Err(ArchiveError::ElementOverflow { value, bits });
        }
        put_bits(buf, pos, value as u64, bits);
        pos += bits as usize;
    }
    if passed {
        put_bits(buf, pos, 1, 1);
    }
    Ok(())
}

fn unpack_record(buf: &[u8], vector_len: usize, bits: u32) -> (Vec<usize>, bool) {
    let mut vector = Vec::with_capacity(vector_len);
    let mut pos = 0;
    for _ in 0..vector_len {
        vector.push(get_bits(buf, pos, bits) as usize);
        pos += bits as usize;
    }
    let passed = get_bits(buf, pos, 1) == 1;
    (vector, passed)
}

/// Streaming writer for the full archive format. The header's count field
/// is back-patched by [`finish`](Self::finish), so the output must be
/// seekable.
pub struct VectorArchiveWriter<W: Write + Seek> {
    out: W,
    vector_len: usize,
    bits: u32,
    count: u64,
    record: Vec<u8>,
}

impl<W: Write + Seek> VectorArchiveWriter<W> {
    pub fn create(mut out: W, vector_len: usize, bits: u32) -> Result<Self, ArchiveError> {
        out.write_u64::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(vector_len as u32)?;
        out.write_u32::<LittleEndian>(bits)?;
        Ok(VectorArchiveWriter {
            out,
            vector_len,
            bits,
            count: 0,
            record: Vec::new(),
        })
    }

    /// Writer sized for vectors of the given state space.
    pub fn for_space(out: W, space: &StateSpace) -> Result<Self, ArchiveError> {
        Self::create(out, space.len(), minimal_bits(space))
    }

    pub fn append(&mut self, vector: &[usize], passed: bool) -> Result<(), ArchiveError> {
        if vector.len() != self.vector_len {
            return Err(ArchiveError::LengthMismatch {
                expected: self.vector_len,
                actual: vector.len(),
            });
        }
        pack_record(vector, passed, self.bits, &mut self.record)?;
        self.out.write_all(&self.record)?;
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Back-patches the vector count into the header and flushes.
    pub fn finish(mut self) -> Result<W, ArchiveError> {
        self.out.seek(SeekFrom::Start(0))?;
        self.out.write_u64::<LittleEndian>(self.count)?;
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Streaming reader for the full archive format.
pub struct VectorArchiveReader<R: Read> {
    input: R,
    count: u64,
    vector_len: usize,
    bits: u32,
    read: u64,
    record: Vec<u8>,
}

impl<R: Read> VectorArchiveReader<R> {
    pub fn open(mut input: R) -> Result<Self, ArchiveError> {
        let count = input.read_u64::<LittleEndian>()?;
        let vector_len = input.read_u32::<LittleEndian>()? as usize;
        let bits = input.read_u32::<LittleEndian>()?;
        if bits == 0 || bits > 64 {
            return Err(ArchiveError::Corrupt(format!(
                "bits per element {} out of range",
                bits
            )));
        }
        let record = vec![0; record_bytes(vector_len, bits)];
        Ok(VectorArchiveReader {
            input,
            count,
            vector_len,
            bits,
            read: 0,
            record,
        })
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn vector_len(&self) -> usize {
        self.vector_len
    }

    pub fn bits_per_elem(&self) -> u32 {
        self.bits
    }

    /// Next `(vector, passed)` record, or `None` past the archived count.
    pub fn read_next(&mut self) -> Result<Option<(Vec<usize>, bool)>, ArchiveError> {
        if self.read == self.count {
            return Ok(None);
        }
        self.input.read_exact(&mut self.record)?;
        self.read += 1;
        Ok(Some(unpack_record(&self.record, self.vector_len, self.bits)))
    }
}

const DELTA_SINGLE_INC: u8 = 1;
const DELTA_SINGLE_SET: u8 = 2;
const DELTA_INC_ZERO_SUFFIX: u8 = 3;
const DELTA_SET_ZERO_SUFFIX: u8 = 4;
const DELTA_EXPLICIT: u8 = 5;

/// Writer for the delta format: full records every `ratio`-th step to the
/// primary stream, tagged differences for the rest to the companion stream.
pub struct DeltaArchiveWriter<P: Write + Seek, C: Write> {
    primary: P,
    companion: C,
    vector_len: usize,
    bits: u32,
    ratio: u32,
    total: u64,
    prev: Vec<usize>,
    record: Vec<u8>,
}

impl<P: Write + Seek, C: Write> DeltaArchiveWriter<P, C> {
    pub fn create(
        mut primary: P,
        mut companion: C,
        vector_len: usize,
        bits: u32,
        ratio: u32,
    ) -> Result<Self, ArchiveError> {
        assert!(ratio >= 1, "delta ratio must be at least 1");
        primary.write_u64::<LittleEndian>(0)?;
        primary.write_u32::<LittleEndian>(vector_len as u32)?;
        primary.write_u32::<LittleEndian>(bits)?;
        companion.write_u32::<LittleEndian>(ratio)?;
        companion.write_u32::<LittleEndian>(vector_len as u32)?;
        Ok(DeltaArchiveWriter {
            primary,
            companion,
            vector_len,
            bits,
            ratio,
            total: 0,
            prev: Vec::new(),
            record: Vec::new(),
        })
    }

    pub fn append(&mut self, vector: &[usize], passed: bool) -> Result<(), ArchiveError> {
        if vector.len() != self.vector_len {
            return Err(ArchiveError::LengthMismatch {
                expected: self.vector_len,
                actual: vector.len(),
            });
        }
        if self.total % self.ratio as u64 == 0 {
            pack_record(vector, passed, self.bits, &mut self.record)?;
            self.primary.write_all(&self.record)?;
        } else {
            self.write_delta(vector, passed)?;
        }
        self.prev.clear();
        self.prev.extend_from_slice(vector);
        self.total += 1;
        Ok(())
    }

    /// Total vectors appended so far, full and delta records combined.
    pub fn count(&self) -> u64 {
        self.total
    }

    /// Back-patches the total count into the primary header and flushes
    /// both streams.
    pub fn finish(mut self) -> Result<(P, C), ArchiveError> {
        self.primary.seek(SeekFrom::Start(0))?;
        self.primary.write_u64::<LittleEndian>(self.total)?;
        self.primary.flush()?;
        self.companion.flush()?;
        Ok((self.primary, self.companion))
    }

    fn write_delta(&mut self, vector: &[usize], passed: bool) -> Result<(), ArchiveError> {
        let diffs: Vec<usize> = (0..self.vector_len)
            .filter(|&i| vector[i] != self.prev[i])
            .collect();
        let out = &mut self.companion;
        match diffs.as_slice() {
            [addr] => {
                if vector[*addr] == self.prev[*addr] + 1 {
                    out.write_u8(DELTA_SINGLE_INC)?;
                    out.write_u32::<LittleEndian>(*addr as u32)?;
                } else {
                    out.write_u8(DELTA_SINGLE_SET)?;
                    out.write_u32::<LittleEndian>(*addr as u32)?;
                    out.write_u64::<LittleEndian>(vector[*addr] as u64)?;
                }
            }
            [addr, rest @ ..] if rest.iter().all(|&j| vector[j] == 0)
                && vector[addr + 1..].iter().all(|&v| v == 0) =>
            {
                if vector[*addr] == self.prev[*addr] + 1 {
                    out.write_u8(DELTA_INC_ZERO_SUFFIX)?;
                    out.write_u32::<LittleEndian>(*addr as u32)?;
                } else {
                    out.write_u8(DELTA_SET_ZERO_SUFFIX)?;
                    out.write_u32::<LittleEndian>(*addr as u32)?;
                    out.write_u64::<LittleEndian>(vector[*addr] as u64)?;
                }
            }
            _ => {
                out.write_u8(DELTA_EXPLICIT)?;
                out.write_u32::<LittleEndian>(diffs.len() as u32)?;
                for &addr in &diffs {
                    out.write_u32::<LittleEndian>(addr as u32)?;
                    out.write_u64::<LittleEndian>(vector[addr] as u64)?;
                }
            }
        }
        out.write_u8(passed as u8)?;
        Ok(())
    }
}

/// Reader for the delta format; replays the primary/companion pair back
/// into the exact vector sequence.
pub struct DeltaArchiveReader<P: Read, C: Read> {
    primary: P,
    companion: C,
    vector_len: usize,
    bits: u32,
    ratio: u32,
    total: u64,
    read: u64,
    current: Vec<usize>,
    record: Vec<u8>,
}

impl<P: Read, C: Read> DeltaArchiveReader<P, C> {
    pub fn open(mut primary: P, mut companion: C) -> Result<Self, ArchiveError> {
        let total = primary.read_u64::<LittleEndian>()?;
        let vector_len = primary.read_u32::<LittleEndian>()? as usize;
        let bits = primary.read_u32::<LittleEndian>()?;
        let ratio = companion.read_u32::<LittleEndian>()?;
        let companion_len = companion.read_u32::<LittleEndian>()? as usize;
        if companion_len != vector_len {
            return Err(ArchiveError::Corrupt(format!(
                "companion vector length {} disagrees with primary {}",
                companion_len, vector_len
            )));
        }
        if ratio == 0 {
            return Err(ArchiveError::Corrupt("delta ratio is zero".to_string()));
        }
        if bits == 0 || bits > 64 {
            return Err(ArchiveError::Corrupt(format!(
                "bits per element {} out of range",
                bits
            )));
        }
        let record = vec![0; record_bytes(vector_len, bits)];
        Ok(DeltaArchiveReader {
            primary,
            companion,
            vector_len,
            bits,
            ratio,
            total,
            read: 0,
            current: vec![0; vector_len],
            record,
        })
    }

    pub fn count(&self) -> u64 {
        self.total
    }

    pub fn read_next(&mut self) -> Result<Option<(Vec<usize>, bool)>, ArchiveError> {
        if self.read == self.total {
            return Ok(None);
        }
        let passed = if self.read % self.ratio as u64 == 0 {
            self.primary.read_exact(&mut self.record)?;
            let (vector, passed) = unpack_record(&self.record, self.vector_len, self.bits);
            self.current = vector;
            passed
        } else {
            self.apply_delta()?
        };
        self.read += 1;
        Ok(Some((self.current.clone(), passed)))
    }

    fn apply_delta(&mut self) -> Result<bool, ArchiveError> {
        let tag = self.companion.read_u8()?;
        match tag {
            DELTA_SINGLE_INC => {
                let addr = self.read_addr()?;
                self.current[addr] += 1;
            }
            DELTA_SINGLE_SET => {
                let addr = self.read_addr()?;
                self.current[addr] = self.companion.read_u64::<LittleEndian>()? as usize;
            }
            DELTA_INC_ZERO_SUFFIX => {
                let addr = self.read_addr()?;
                self.current[addr] += 1;
                for slot in &mut self.current[addr + 1..] {
                    *slot = 0;
                }
            }
            DELTA_SET_ZERO_SUFFIX => {
                let addr = self.read_addr()?;
                self.current[addr] = self.companion.read_u64::<LittleEndian>()? as usize;
                for slot in &mut self.current[addr + 1..] {
                    *slot = 0;
                }
            }
            DELTA_EXPLICIT => {
                let entries = self.companion.read_u32::<LittleEndian>()?;
                for _ in 0..entries {
                    let addr = self.read_addr()?;
                    self.current[addr] = self.companion.read_u64::<LittleEndian>()? as usize;
                }
            }
            other => {
                return Err(ArchiveError::Corrupt(format!(
                    "unknown delta tag {}",
                    other
                )));
            }
        }
        Ok(self.companion.read_u8()? == 1)
    }

    fn read_addr(&mut self) -> Result<usize, ArchiveError> {
        let addr = self.companion.read_u32::<LittleEndian>()? as usize;
        if addr >= self.vector_len {
            return Err(ArchiveError::Corrupt(format!(
                "delta address {} out of range",
                addr
            )));
        }
        Ok(addr)
    }
}

/// Listener that archives every explored candidate in the full format.
///
/// Archive I/O is a collaborator boundary: a write failure warns, disables
/// further archiving, and lets the search continue.
pub struct ArchiveListener<W: Write + Seek> {
    writer: Option<VectorArchiveWriter<W>>,
}

impl<W: Write + Seek> ArchiveListener<W> {
    pub fn new(writer: VectorArchiveWriter<W>) -> Self {
        ArchiveListener {
            writer: Some(writer),
        }
    }
}

impl ArchiveListener<BufWriter<File>> {
    /// Creates an archive file sized for the given state space.
    pub fn create_at<Q: AsRef<Path>>(path: Q, space: &StateSpace) -> Result<Self, ArchiveError> {
        let file = BufWriter::new(File::create(path)?);
        Ok(Self::new(VectorArchiveWriter::for_space(file, space)?))
    }
}

impl<W: Write + Seek> SearchListener for ArchiveListener<W> {
    fn on_candidate(&mut self, step: &Step<'_>) {
        if let Some(writer) = &mut self.writer {
            if let Err(err) = writer.append(step.vector, step.valid) {
                log::warn!("candidate archive write failed, archiving disabled: {}", err);
                self.writer = None;
            }
        }
    }

    fn on_run_finished(&mut self, _stats: &RunStats) {
        if let Some(writer) = self.writer.take() {
            if let Err(err) = writer.finish() {
                log::warn!("candidate archive finish failed: {}", err);
            }
        }
    }
}
