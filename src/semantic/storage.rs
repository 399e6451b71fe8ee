//! Binary storage for the vector index and its id map.
//!
//! File format: nic_index.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated, in position order):
//! - id_len: u32 (little-endian)
//! - id: [u8; id_len] (UTF-8 document id)
//! - vector: [f32; dimensions] (little-endian, normalised)
//!
//! Trailer:
//! - checksum: u32 (CRC32 of all entry bytes)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::semantic::index::{IndexError, VectorIndex};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// Upper bound for a single document id
const MAX_ID_LEN: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl From<IndexError> for VectorStorageError {
    fn from(err: IndexError) -> Self {
        VectorStorageError::InvalidFormat(err.to_string())
    }
}

/// Storage manager for one index file.
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the index and id map.
    ///
    /// `expected_dimensions` is checked only when given; the file's own
    /// dimension is used otherwise.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: Option<usize>,
    ) -> Result<VectorIndex, VectorStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        validate_header(&header, expected_model_id, expected_dimensions)?;

        let dimensions = header.dimensions as usize;
        let count = usize::try_from(header.entry_count)
            .map_err(|_| VectorStorageError::InvalidFormat("entry count too large".into()))?;

        let mut hasher = crc32fast::Hasher::new();
        // cap preallocation, a corrupt count must not exhaust memory
        let mut index = VectorIndex::with_capacity(dimensions, count.min(1 << 20));
        let mut vector = vec![0f32; dimensions];

        for _ in 0..count {
            let id = read_entry(&mut reader, &mut hasher, &mut vector)?;
            index.add(&id, &vector)?;
        }

        let mut trailer = [0u8; 4];
        read_exact(&mut reader, &mut trailer)?;
        if u32::from_le_bytes(trailer) != hasher.finalize() {
            return Err(VectorStorageError::ChecksumMismatch);
        }

        let mut rest = [0u8; 1];
        if reader.read(&mut rest)? != 0 {
            return Err(VectorStorageError::InvalidFormat(
                "trailing data after entries".into(),
            ));
        }

        Ok(index)
    }

    /// Save the index and id map.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save(&self, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
        let dimensions = u16::try_from(index.dimensions()).map_err(|_| {
            VectorStorageError::InvalidFormat(format!(
                "dimension {} does not fit the file format",
                index.dimensions()
            ))
        })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let temp_path = self.path.with_extension("tmp");

        let result = write_to_file(&temp_path, index, model_id, dimensions);
        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        log::info!(
            "Saved index with {} vectors to {}",
            index.len(),
            self.path.display()
        );
        Ok(())
    }
}

fn write_to_file(
    path: &Path,
    index: &VectorIndex,
    model_id: &[u8; 32],
    dimensions: u16,
) -> Result<(), VectorStorageError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let header = Header {
        version: FORMAT_VERSION,
        model_id: *model_id,
        dimensions,
        entry_count: index.len() as u64,
    };
    write_header(&mut writer, &header)?;

    let mut hasher = crc32fast::Hasher::new();
    for (id, vector) in index.iter() {
        write_entry(&mut writer, &mut hasher, id, vector)?;
    }
    writer.write_all(&hasher.finalize().to_le_bytes())?;

    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok(())
}

/// `read_exact` that reports a short file as a format error.
fn read_exact(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), VectorStorageError> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            VectorStorageError::InvalidFormat("file is truncated".into())
        } else {
            VectorStorageError::Io(err)
        }
    })
}

fn read_header(reader: &mut impl Read) -> Result<Header, VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    read_exact(reader, &mut header_bytes)?;

    let version = header_bytes[0];
    if version != FORMAT_VERSION {
        return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes([
        header_bytes[43],
        header_bytes[44],
        header_bytes[45],
        header_bytes[46],
    ]);
    if stored_checksum != crc32fast::hash(&header_bytes[0..43]) {
        return Err(VectorStorageError::ChecksumMismatch);
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header_bytes[1..33]);

    let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);

    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&header_bytes[35..43]);
    let entry_count = u64::from_le_bytes(count_bytes);

    Ok(Header {
        version,
        model_id,
        dimensions,
        entry_count,
    })
}

fn validate_header(
    header: &Header,
    expected_model_id: &[u8; 32],
    expected_dimensions: Option<usize>,
) -> Result<(), VectorStorageError> {
    if header.model_id != *expected_model_id {
        return Err(VectorStorageError::ModelMismatch);
    }

    if header.dimensions == 0 {
        return Err(VectorStorageError::InvalidFormat("zero dimension".into()));
    }

    if let Some(expected) = expected_dimensions {
        if header.dimensions as usize != expected {
            return Err(VectorStorageError::DimensionMismatch {
                expected,
                got: header.dimensions as usize,
            });
        }
    }

    Ok(())
}

fn write_header(writer: &mut impl Write, header: &Header) -> Result<(), VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];

    header_bytes[0] = header.version;
    header_bytes[1..33].copy_from_slice(&header.model_id);
    header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
    header_bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());

    let checksum = crc32fast::hash(&header_bytes[0..43]);
    header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&header_bytes)?;
    Ok(())
}

/// Read one entry into `vector`, returning its document id.
fn read_entry(
    reader: &mut impl Read,
    hasher: &mut crc32fast::Hasher,
    vector: &mut [f32],
) -> Result<String, VectorStorageError> {
    let mut len_bytes = [0u8; 4];
    read_exact(reader, &mut len_bytes)?;
    hasher.update(&len_bytes);

    let id_len = u32::from_le_bytes(len_bytes) as usize;
    if id_len == 0 || id_len > MAX_ID_LEN {
        return Err(VectorStorageError::InvalidFormat(format!(
            "invalid document id length {id_len}"
        )));
    }

    let mut id_bytes = vec![0u8; id_len];
    read_exact(reader, &mut id_bytes)?;
    hasher.update(&id_bytes);
    let id = String::from_utf8(id_bytes)
        .map_err(|_| VectorStorageError::InvalidFormat("document id is not UTF-8".into()))?;

    let mut float_bytes = [0u8; 4];
    for value in vector.iter_mut() {
        read_exact(reader, &mut float_bytes)?;
        hasher.update(&float_bytes);
        *value = f32::from_le_bytes(float_bytes);
    }

    Ok(id)
}

fn write_entry(
    writer: &mut impl Write,
    hasher: &mut crc32fast::Hasher,
    id: &str,
    vector: &[f32],
) -> Result<(), VectorStorageError> {
    let len_bytes = (id.len() as u32).to_le_bytes();
    writer.write_all(&len_bytes)?;
    hasher.update(&len_bytes);

    writer.write_all(id.as_bytes())?;
    hasher.update(id.as_bytes());

    for &value in vector {
        let bytes = value.to_le_bytes();
        writer.write_all(&bytes)?;
        hasher.update(&bytes);
    }

    Ok(())
}

#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}
