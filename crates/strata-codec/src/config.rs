use serde::{Deserialize, Serialize};

/// Limits and checks applied while reading streams.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Compare the CRC32 trailer against the bytes read.
    pub verify_checksum: bool,
    /// Longest child name accepted, in bytes.
    pub max_name_len: usize,
    /// Most trees accepted in one delta chain stream.
    pub max_chain_len: usize,
    /// Deepest node nesting accepted below the scope path.
    pub max_nesting: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            verify_checksum: true,
            max_name_len: 4096,
            max_chain_len: 65_536,
            max_nesting: 1024,
        }
    }
}
