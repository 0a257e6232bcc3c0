//! SMQ weight-file reader (component I, spec §6).
//!
//! Maps a file to the tensor store's data layout and validates the
//! header, directory, and offsets. This is loader-only work; nothing
//! here runs on the decode hot path.

use crate::config::ModelConfig;
use crate::error::{LoadError, LoadResult};
use crate::model::Model;
use crate::quant::QuantScheme;
use crate::store::{TensorEntry, TensorStore};
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

const MAGIC: &[u8; 8] = b"SMQv0001";
const HEADER_LEN: usize = 32;
const DIR_ENTRY_LEN: usize = 156;
const NAME_LEN: usize = 64;

struct Header {
    version: u32,
    header_size: u32,
    tensor_count: u32,
    metadata_len: u32,
}

fn parse_header(bytes: &[u8]) -> LoadResult<Header> {
    if bytes.len() < HEADER_LEN {
        return Err(LoadError::BadSize(format!(
            "file shorter than {HEADER_LEN}-byte header"
        )));
    }
    if &bytes[0..8] != MAGIC {
        return Err(LoadError::BadMagic);
    }
    let version = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    if version != 1 {
        return Err(LoadError::BadVersion(version));
    }
    let header_size = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
    if header_size as usize != HEADER_LEN {
        return Err(LoadError::BadSize(format!(
            "header_size field is {header_size}, expected {HEADER_LEN}"
        )));
    }
    let tensor_count = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
    let metadata_len = u32::from_le_bytes(bytes[20..24].try_into().unwrap());
    Ok(Header {
        version,
        header_size,
        tensor_count,
        metadata_len,
    })
}

fn parse_directory_entry(bytes: &[u8]) -> LoadResult<(String, TensorEntry)> {
    let name_bytes = &bytes[0..NAME_LEN];
    let nul = name_bytes.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    let name = String::from_utf8_lossy(&name_bytes[..nul]).into_owned();

    let mut off = NAME_LEN;
    let scheme_tag = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
    off += 4;
    let scheme = QuantScheme::from_tag(scheme_tag)
        .ok_or_else(|| LoadError::BadSize(format!("tensor '{name}' has unknown scheme tag {scheme_tag}")))?;
    let rank = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()) as usize;
    off += 4;
    if !(1..=8).contains(&rank) {
        return Err(LoadError::BadSize(format!(
            "tensor '{name}' has invalid rank {rank}"
        )));
    }
    let mut shape = [0usize; 8];
    for s in shape.iter_mut() {
        *s = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()) as usize;
        off += 4;
    }
    let block_size = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()) as usize;
    off += 4;
    let data_offset = u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()) as usize;
    off += 8;
    let data_len = u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()) as usize;
    off += 8;
    let aux_offset = u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()) as usize;
    off += 8;
    let aux_len = u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()) as usize;

    let entry = TensorEntry {
        scheme,
        shape,
        rank,
        block_size,
        data_offset,
        data_len,
        aux_offset,
        aux_len,
    };
    Ok((name, entry))
}

fn validate_and_index(
    header: &Header,
    dir_bytes: &[u8],
) -> LoadResult<HashMap<String, TensorEntry>> {
    let mut entries = HashMap::with_capacity(header.tensor_count as usize);
    let mut regions: Vec<(usize, usize, String)> = Vec::new();

    for i in 0..header.tensor_count as usize {
        let start = i * DIR_ENTRY_LEN;
        let (name, entry) = parse_directory_entry(&dir_bytes[start..start + DIR_ENTRY_LEN])?;

        let rows = entry.shape[0].max(1);
        let cols = if entry.rank >= 2 { entry.shape[1] } else { 1 };
        let computed = entry.scheme.expected_data_len(rows, cols, entry.block_size);
        if computed != entry.data_len {
            return Err(LoadError::TensorSizeMismatch {
                name,
                declared: entry.data_len as u64,
                computed: computed as u64,
            });
        }

        let computed_aux = entry.scheme.expected_aux_len(rows, cols, entry.block_size);
        if computed_aux != entry.aux_len {
            return Err(LoadError::TensorSizeMismatch {
                name: format!("{name}.aux"),
                declared: entry.aux_len as u64,
                computed: computed_aux as u64,
            });
        }

        regions.push((entry.data_offset, entry.data_offset + entry.data_len, name.clone()));
        if entry.aux_len > 0 {
            regions.push((entry.aux_offset, entry.aux_offset + entry.aux_len, name.clone()));
        }
        entries.insert(name, entry);
    }

    regions.sort_by_key(|(start, _, _)| *start);
    for w in regions.windows(2) {
        let (_, end0, name0) = &w[0];
        let (start1, _, name1) = &w[1];
        if start1 < end0 {
            return Err(LoadError::Overlap(format!("{name0} overlaps {name1}")));
        }
    }

    Ok(entries)
}

/// Load a model from an SMQ file, memory-mapping the payload region.
pub fn load_model(path: impl AsRef<Path>) -> LoadResult<Model> {
    let file = File::open(path)?;
    // SAFETY: the file is not expected to be mutated concurrently; the
    // store only ever reads through this mapping.
    let mmap = unsafe { Mmap::map(&file)? };
    let header = parse_header(&mmap)?;

    let meta_start = HEADER_LEN;
    let meta_end = meta_start + header.metadata_len as usize;
    if mmap.len() < meta_end {
        return Err(LoadError::BadSize("file truncated before metadata blob".into()));
    }
    let metadata_bytes = &mmap[meta_start..meta_end];
    let config: ModelConfig = if metadata_bytes.is_empty() {
        return Err(LoadError::BadSize("metadata blob is empty".into()));
    } else {
        serde_json::from_slice(metadata_bytes)?
    };
    config
        .validate()
        .map_err(|e| LoadError::BadSize(e.to_string()))?;

    let dir_start = meta_end;
    let dir_len = header.tensor_count as usize * DIR_ENTRY_LEN;
    let dir_end = dir_start + dir_len;
    if mmap.len() < dir_end {
        return Err(LoadError::BadSize("file truncated before tensor directory".into()));
    }
    let entries = validate_and_index(&header, &mmap[dir_start..dir_end])?;

    let store = TensorStore::from_mmap(mmap, dir_end, entries);
    Ok(Model { config, store })
}

/// Load a model from an in-memory buffer (used by tests and small
/// embedded deployments that avoid mmap).
pub fn load_model_from_bytes(bytes: Vec<u8>) -> LoadResult<Model> {
    let header = parse_header(&bytes)?;
    let meta_start = HEADER_LEN;
    let meta_end = meta_start + header.metadata_len as usize;
    if bytes.len() < meta_end {
        return Err(LoadError::BadSize("buffer truncated before metadata blob".into()));
    }
    let config: ModelConfig = serde_json::from_slice(&bytes[meta_start..meta_end])?;
    config
        .validate()
        .map_err(|e| LoadError::BadSize(e.to_string()))?;

    let dir_start = meta_end;
    let dir_len = header.tensor_count as usize * DIR_ENTRY_LEN;
    let dir_end = dir_start + dir_len;
    if bytes.len() < dir_end {
        return Err(LoadError::BadSize("buffer truncated before tensor directory".into()));
    }
    let entries = validate_and_index(&header, &bytes[dir_start..dir_end])?;

    let store = TensorStore::from_owned(bytes, dir_end, entries);
    Ok(Model { config, store })
}
