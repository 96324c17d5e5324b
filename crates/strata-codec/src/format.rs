//! Stream layout shared by the writer and the reader.
//!
//! ```text
//! magic "STRA" | version u32 BE | kind u8 | scope path | depth | body | crc32 u32 BE
//! ```
//!
//! The scope path is a varint segment count followed by varint-length UTF-8
//! names. Depth is a varint: 0 for unbounded, `n + 1` for `Bounded(n)`. The
//! CRC32 trailer covers every byte before it.
//!
//! Each node starts with a [`NodeTag`]. Tags that carry data are followed by
//! the payload. Present nodes are then followed by a children section: a
//! [`CHILDREN_LISTED`] marker, a varint count and `(name, node)` pairs in
//! name order, or a single [`CHILDREN_ELIDED`] marker where the depth bound
//! cut the subtree off.

use std::fmt;
use std::io::{self, Read, Write};

use crate::error::{CodecError, CodecResult};

pub const MAGIC: &[u8; 4] = b"STRA";
pub const VERSION: u32 = 1;

pub const CHILDREN_LISTED: u8 = 0;
pub const CHILDREN_ELIDED: u8 = 1;

/// What a stream holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Tree,
    Delta,
    Chain,
}

impl StreamKind {
    pub fn type_byte(self) -> u8 {
        match self {
            StreamKind::Tree => 1,
            StreamKind::Delta => 2,
            StreamKind::Chain => 3,
        }
    }

    pub fn from_type_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(StreamKind::Tree),
            2 => Some(StreamKind::Delta),
            3 => Some(StreamKind::Chain),
            _ => None,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Tree => write!(f, "tree"),
            StreamKind::Delta => write!(f, "delta"),
            StreamKind::Chain => write!(f, "chain"),
        }
    }
}

/// Leading byte of every encoded node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeTag {
    CompleteWithData,
    CompleteNoData,
    DeltaKeepData,
    DeltaWithData,
    DeltaNoData,
    Deleted,
    Unchanged,
}

impl NodeTag {
    pub fn type_byte(self) -> u8 {
        match self {
            NodeTag::CompleteWithData => 0,
            NodeTag::CompleteNoData => 1,
            NodeTag::DeltaKeepData => 2,
            NodeTag::DeltaWithData => 3,
            NodeTag::DeltaNoData => 4,
            NodeTag::Deleted => 5,
            NodeTag::Unchanged => 6,
        }
    }

    pub fn from_type_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(NodeTag::CompleteWithData),
            1 => Some(NodeTag::CompleteNoData),
            2 => Some(NodeTag::DeltaKeepData),
            3 => Some(NodeTag::DeltaWithData),
            4 => Some(NodeTag::DeltaNoData),
            5 => Some(NodeTag::Deleted),
            6 => Some(NodeTag::Unchanged),
            _ => None,
        }
    }

    pub fn is_complete(self) -> bool {
        matches!(self, NodeTag::CompleteWithData | NodeTag::CompleteNoData)
    }

    pub fn has_data(self) -> bool {
        matches!(self, NodeTag::CompleteWithData | NodeTag::DeltaWithData)
    }

    /// Tags followed by a children section.
    pub fn has_children(self) -> bool {
        !matches!(self, NodeTag::Deleted | NodeTag::Unchanged)
    }
}

// ---------------------------------------------------------------
// Varints
// ---------------------------------------------------------------

/// Encode a u64 as a variable-length integer.
pub fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Write a varint straight to a stream.
pub fn write_varint(out: &mut dyn Write, value: u64) -> io::Result<()> {
    let mut buf = Vec::with_capacity(10);
    encode_varint(&mut buf, value);
    out.write_all(&buf)
}

/// Read one varint from a stream.
pub fn read_varint(input: &mut dyn Read) -> CodecResult<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;
    loop {
        let mut byte = [0u8; 1];
        read_exact(input, &mut byte)?;
        let byte = byte[0];
        if shift == 63 && byte > 1 {
            return Err(CodecError::corrupt("varint overflow"));
        }
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(CodecError::corrupt("varint overflow"));
        }
    }
}

/// `read_exact` that reports a short stream as corruption.
pub fn read_exact(input: &mut dyn Read, buf: &mut [u8]) -> CodecResult<()> {
    input.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => CodecError::corrupt("truncated stream"),
        _ => CodecError::Io(e),
    })
}

// ---------------------------------------------------------------
// Checksummed streams
// ---------------------------------------------------------------

/// Writer that hashes everything passing through it.
pub(crate) struct ChecksumWriter<'a> {
    inner: &'a mut dyn Write,
    hasher: crc32fast::Hasher,
    written: u64,
}

impl<'a> ChecksumWriter<'a> {
    pub(crate) fn new(inner: &'a mut dyn Write) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            written: 0,
        }
    }

    /// Append the CRC32 trailer. Returns the total stream length.
    pub(crate) fn finish(self) -> io::Result<u64> {
        let crc = self.hasher.finalize();
        self.inner.write_all(&crc.to_be_bytes())?;
        self.inner.flush()?;
        Ok(self.written + 4)
    }
}

impl Write for ChecksumWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader that hashes everything passing through it.
pub(crate) struct ChecksumReader<'a> {
    inner: &'a mut dyn Read,
    hasher: crc32fast::Hasher,
}

impl<'a> ChecksumReader<'a> {
    pub(crate) fn new(inner: &'a mut dyn Read) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    /// Read the CRC32 trailer and compare it with the bytes seen so far.
    pub(crate) fn finish(self, verify: bool) -> CodecResult<()> {
        let mut trailer = [0u8; 4];
        read_exact(self.inner, &mut trailer)?;
        let stored = u32::from_be_bytes(trailer);
        let computed = self.hasher.finalize();
        if verify && stored != computed {
            return Err(CodecError::ChecksumMismatch { stored, computed });
        }
        Ok(())
    }
}

impl Read for ChecksumReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}
