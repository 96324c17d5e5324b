use std::io::{Read, Write};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use strata_types::TreePath;

use crate::error::{CodecError, CodecResult};
use crate::format::{read_exact, read_varint, write_varint};

/// Turns node payloads into bytes and back.
///
/// Implementations must delimit their own output: the reader hands
/// `read_data` the stream positioned at the payload and expects it to
/// consume exactly what `write_data` produced. Nodes without data never
/// reach the flattener.
pub trait DataFlattener<T> {
    fn write_data(&self, path: &TreePath, data: &T, out: &mut dyn Write) -> CodecResult<()>;

    fn read_data(&self, path: &TreePath, input: &mut dyn Read) -> CodecResult<T>;
}

/// Length-prefixed bincode encoding for any serde type.
pub struct BincodeFlattener<T> {
    max_len: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeFlattener<T> {
    /// Largest payload accepted by default: 64 MiB.
    pub const DEFAULT_MAX_LEN: u64 = 64 * 1024 * 1024;

    pub fn new() -> Self {
        Self::with_max_len(Self::DEFAULT_MAX_LEN)
    }

    pub fn with_max_len(max_len: u64) -> Self {
        Self {
            max_len,
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeFlattener<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for BincodeFlattener<T> {
    fn clone(&self) -> Self {
        Self::with_max_len(self.max_len)
    }
}

impl<T> std::fmt::Debug for BincodeFlattener<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BincodeFlattener")
            .field("max_len", &self.max_len)
            .finish()
    }
}

impl<T: Serialize + DeserializeOwned> DataFlattener<T> for BincodeFlattener<T> {
    fn write_data(&self, path: &TreePath, data: &T, out: &mut dyn Write) -> CodecResult<()> {
        let bytes = bincode::serialize(data).map_err(|e| CodecError::Unencodable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        write_varint(out, bytes.len() as u64)?;
        out.write_all(&bytes)?;
        Ok(())
    }

    fn read_data(&self, path: &TreePath, input: &mut dyn Read) -> CodecResult<T> {
        let len = read_varint(input)?;
        if len > self.max_len {
            return Err(CodecError::Payload {
                path: path.clone(),
                reason: format!("payload of {len} bytes exceeds limit of {}", self.max_len),
            });
        }
        let mut bytes = vec![0u8; len as usize];
        read_exact(input, &mut bytes)?;
        bincode::deserialize(&bytes).map_err(|e| CodecError::Payload {
            path: path.clone(),
            reason: e.to_string(),
        })
    }
}
