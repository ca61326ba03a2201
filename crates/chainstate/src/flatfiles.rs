//! Rolling block files: `blk0001.dat`, `blk0002.dat`, ...
//!
//! Each record is a 4-byte network magic, a 4-byte little-endian payload
//! length, then the serialized block. Files are capped safely below 2 GB
//! so offsets stay inside 32 bits everywhere. Startup recovery re-scans the
//! files for record magics, tolerating a torn tail write.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Stay under the 2 GB fseek/ftell boundary with room for one max block.
pub const MAX_BLOCK_FILE_SIZE: u64 = 0x7F00_0000;

const RECORD_HEADER_LEN: u64 = 8;

#[derive(Debug)]
pub enum BlockFileError {
    Io(std::io::Error),
    BadMagic,
    RecordTruncated,
    InvalidLocation,
}

impl std::fmt::Display for BlockFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockFileError::Io(err) => write!(f, "{err}"),
            BlockFileError::BadMagic => write!(f, "block record magic mismatch"),
            BlockFileError::RecordTruncated => write!(f, "block record truncated"),
            BlockFileError::InvalidLocation => write!(f, "invalid block file location"),
        }
    }
}

impl std::error::Error for BlockFileError {}

impl From<std::io::Error> for BlockFileError {
    fn from(err: std::io::Error) -> Self {
        BlockFileError::Io(err)
    }
}

pub struct BlockFileStore {
    dir: PathBuf,
    magic: [u8; 4],
    max_file_size: u64,
    state: Mutex<ActiveFile>,
}

#[derive(Debug)]
struct ActiveFile {
    file_id: u32,
    len: u64,
}

impl BlockFileStore {
    pub fn new(dir: impl Into<PathBuf>, magic: [u8; 4]) -> Result<Self, BlockFileError> {
        Self::with_max_file_size(dir, magic, MAX_BLOCK_FILE_SIZE)
    }

    pub fn with_max_file_size(
        dir: impl Into<PathBuf>,
        magic: [u8; 4],
        max_file_size: u64,
    ) -> Result<Self, BlockFileError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let active = locate_active_file(&dir, max_file_size)?;
        Ok(Self {
            dir,
            magic,
            max_file_size,
            state: Mutex::new(active),
        })
    }

    /// Append one block record; returns `(file_id, payload_offset)`.
    pub fn append(&self, payload: &[u8]) -> Result<(u32, u32), BlockFileError> {
        let mut state = self.state.lock().expect("block file lock");
        let needed = RECORD_HEADER_LEN + payload.len() as u64;
        if state.len + needed > self.max_file_size {
            state.file_id += 1;
            state.len = 0;
        }
        let payload_offset = state.len + RECORD_HEADER_LEN;
        let path = self.file_path(state.file_id);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&self.magic)?;
        file.write_all(&(payload.len() as u32).to_le_bytes())?;
        file.write_all(payload)?;
        file.flush()?;
        state.len += needed;
        Ok((state.file_id, payload_offset as u32))
    }

    /// Read the record whose payload begins at `payload_offset`.
    pub fn read_record(&self, file_id: u32, payload_offset: u32) -> Result<Vec<u8>, BlockFileError> {
        if (payload_offset as u64) < RECORD_HEADER_LEN {
            return Err(BlockFileError::InvalidLocation);
        }
        let mut file = File::open(self.file_path(file_id))?;
        file.seek(SeekFrom::Start(payload_offset as u64 - RECORD_HEADER_LEN))?;
        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;
        if header[0..4] != self.magic {
            return Err(BlockFileError::BadMagic);
        }
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let mut payload = vec![0u8; len];
        file.read_exact(&mut payload)
            .map_err(|_| BlockFileError::RecordTruncated)?;
        Ok(payload)
    }

    /// Read raw bytes starting mid-record; used to deserialize a single
    /// transaction straight off its disk position.
    pub fn read_from(
        &self,
        file_id: u32,
        offset: u32,
        max_len: usize,
    ) -> Result<Vec<u8>, BlockFileError> {
        let mut file = File::open(self.file_path(file_id))?;
        file.seek(SeekFrom::Start(offset as u64))?;
        let mut buffer = vec![0u8; max_len];
        let mut filled = 0usize;
        loop {
            let read = file.read(&mut buffer[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
            if filled == buffer.len() {
                break;
            }
        }
        buffer.truncate(filled);
        Ok(buffer)
    }

    /// Scan every record in every file, in write order. Malformed bytes are
    /// skipped by searching forward for the next magic; the scan stops when
    /// the shutdown flag trips.
    pub fn scan_records<F>(
        &self,
        shutdown: &AtomicBool,
        mut visitor: F,
    ) -> Result<usize, BlockFileError>
    where
        F: FnMut(u32, u32, Vec<u8>) -> Result<(), BlockFileError>,
    {
        let mut visited = 0usize;
        let mut file_id = 1u32;
        loop {
            let path = self.file_path(file_id);
            if !path.exists() {
                break;
            }
            let mut data = Vec::new();
            File::open(&path)?.read_to_end(&mut data)?;
            let mut cursor = 0usize;
            while cursor + RECORD_HEADER_LEN as usize <= data.len() {
                if shutdown.load(Ordering::Relaxed) {
                    return Ok(visited);
                }
                if data[cursor..cursor + 4] != self.magic {
                    cursor += 1;
                    continue;
                }
                let len = u32::from_le_bytes([
                    data[cursor + 4],
                    data[cursor + 5],
                    data[cursor + 6],
                    data[cursor + 7],
                ]) as usize;
                let payload_start = cursor + RECORD_HEADER_LEN as usize;
                if payload_start + len > data.len() {
                    // Torn tail write; nothing after it can be valid.
                    break;
                }
                let payload = data[payload_start..payload_start + len].to_vec();
                visitor(file_id, payload_start as u32, payload)?;
                visited += 1;
                cursor = payload_start + len;
            }
            file_id += 1;
        }
        Ok(visited)
    }

    fn file_path(&self, file_id: u32) -> PathBuf {
        self.dir.join(format!("blk{file_id:04}.dat"))
    }
}

fn locate_active_file(dir: &Path, max_file_size: u64) -> Result<ActiveFile, BlockFileError> {
    let mut file_id = 1u32;
    let mut last: Option<(u32, u64)> = None;
    loop {
        let path = dir.join(format!("blk{file_id:04}.dat"));
        if !path.exists() {
            break;
        }
        last = Some((file_id, std::fs::metadata(&path)?.len()));
        file_id += 1;
    }
    Ok(match last {
        Some((id, len)) if len >= max_file_size => ActiveFile {
            file_id: id + 1,
            len: 0,
        },
        Some((id, len)) => ActiveFile { file_id: id, len },
        None => ActiveFile { file_id: 1, len: 0 },
    })
}
