//! Machine state snapshots
//!
//! Explicit state structs serialized with bincode and compressed with
//! zstd. A snapshot captures the cpu (registers, counter pair, both
//! coprocessors) and every mapped memory page; devices restart from
//! their reset state, so a restored machine behaves like one that just
//! took an interrupt-free breath, not a bit-exact board clone.

use serde::{Deserialize, Serialize};

use crate::errors::MachineError;
use crate::memory::ByteOrder;

pub const SNAPSHOT_VERSION: u32 = 1;

/// zstd compression level for snapshots
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Serialize, Deserialize)]
pub struct CpuState {
    pub reg: [u32; 32],
    pub hi: u32,
    pub lo: u32,
    pub pc: u32,
    pub next_pc: u32,
    pub cycle: u64,
    pub ll_bit: bool,
    pub ll_addr: u32,
    pub cp0: Vec<u32>,
    pub fpu_reg: [u32; 32],
    pub fcsr: u32,
    pub fir: u32,
}

#[derive(Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub version: u32,
    pub byte_order: ByteOrder,
    pub cpu: CpuState,
    /// page index -> page words
    pub pages: Vec<(u32, Vec<u32>)>,
}

impl MachineSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, MachineError> {
        let raw = bincode::serialize(self)
            .map_err(|e| MachineError::BadSnapshot(format!("serialize: {}", e)))?;
        zstd::stream::encode_all(&raw[..], COMPRESSION_LEVEL)
            .map_err(|e| MachineError::BadSnapshot(format!("compress: {}", e)))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, MachineError> {
        let raw = zstd::stream::decode_all(data)
            .map_err(|e| MachineError::BadSnapshot(format!("decompress: {}", e)))?;
        let snapshot: MachineSnapshot = bincode::deserialize(&raw)
            .map_err(|e| MachineError::BadSnapshot(format!("deserialize: {}", e)))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(MachineError::BadSnapshot(format!(
                "version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        Ok(snapshot)
    }
}
