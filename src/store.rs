//! Quantized tensor store (component A): read-only access to weight
//! matrices addressed by logical name, backed by a memory-mapped file or
//! an in-memory buffer. Accesses return stable pointers for the lifetime
//! of the store, required for unsafe SIMD loads in the kernel layer.

use crate::error::LoadError;
use crate::quant::QuantScheme;
use memmap2::Mmap;
use std::collections::HashMap;
use std::sync::Arc;

/// Where a tensor's bytes live inside the store's backing buffer.
#[derive(Debug, Clone, Copy)]
pub struct TensorEntry {
    pub scheme: QuantScheme,
    pub shape: [usize; 8],
    pub rank: usize,
    pub block_size: usize,
    pub data_offset: usize,
    pub data_len: usize,
    pub aux_offset: usize,
    pub aux_len: usize,
}

impl TensorEntry {
    pub fn rows(&self) -> usize {
        self.shape[0]
    }

    pub fn cols(&self) -> usize {
        if self.rank >= 2 {
            self.shape[1]
        } else {
            1
        }
    }
}

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Mapped(m) => m,
            Backing::Owned(v) => v,
        }
    }
}

/// Holds every tensor of a loaded model. Immutable once built; shared by
/// reference across sessions with no synchronization (spec §5).
pub struct TensorStore {
    backing: Backing,
    payload_start: usize,
    entries: HashMap<String, TensorEntry>,
}

impl TensorStore {
    pub(crate) fn from_mmap(
        mmap: Mmap,
        payload_start: usize,
        entries: HashMap<String, TensorEntry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            backing: Backing::Mapped(mmap),
            payload_start,
            entries,
        })
    }

    pub(crate) fn from_owned(
        bytes: Vec<u8>,
        payload_start: usize,
        entries: HashMap<String, TensorEntry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            backing: Backing::Owned(bytes),
            payload_start,
            entries,
        })
    }

    pub fn entry(&self, name: &str) -> Result<&TensorEntry, LoadError> {
        self.entries
            .get(name)
            .ok_or_else(|| LoadError::MissingTensor(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    /// Borrow the raw data bytes for a tensor, relative to the payload
    /// region start.
    pub fn data_bytes(&self, name: &str) -> Result<&[u8], LoadError> {
        let e = self.entry(name)?;
        let start = self.payload_start + e.data_offset;
        Ok(&self.backing.bytes()[start..start + e.data_len])
    }

    /// Borrow the raw aux bytes (scales/mins) for a tensor; empty slice
    /// when the tensor has no aux region (e.g. F32, Q4_K's embedded
    /// scales).
    pub fn aux_bytes(&self, name: &str) -> Result<&[u8], LoadError> {
        let e = self.entry(name)?;
        if e.aux_len == 0 {
            return Ok(&[]);
        }
        let start = self.payload_start + e.aux_offset;
        Ok(&self.backing.bytes()[start..start + e.aux_len])
    }

    /// Interpret the aux bytes as `f32` scales (and, for Q4_1, the
    /// trailing half as per-block mins).
    pub fn scales_f32(&self, name: &str) -> Result<&[f32], LoadError> {
        let bytes = self.aux_bytes(name)?;
        Ok(bytemuck::cast_slice(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(data_len: usize) -> TensorEntry {
        TensorEntry {
            scheme: QuantScheme::F32,
            shape: [2, 2, 0, 0, 0, 0, 0, 0],
            rank: 2,
            block_size: 0,
            data_offset: 0,
            data_len,
            aux_offset: data_len,
            aux_len: 0,
        }
    }

    #[test]
    fn missing_tensor_is_reported_by_name() {
        let store = TensorStore::from_owned(vec![0u8; 16], 0, HashMap::new());
        let err = store.entry("nope").unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn data_bytes_are_sliced_relative_to_payload_start() {
        let mut entries = HashMap::new();
        entries.insert("w".to_string(), entry(16));
        let mut buf = vec![0xAAu8; 8];
        buf.extend(vec![0xBBu8; 16]);
        let store = TensorStore::from_owned(buf, 8, entries);
        let data = store.data_bytes("w").unwrap();
        assert_eq!(data, &[0xBBu8; 16][..]);
    }
}
