//! Binary cursor for SCF wire formats
//!
//! An append/advance buffer with explicit big-endian encoding, used by every
//! wire-format writer and reader in the crate. Writable cursors own their
//! storage and grow on demand; read-only cursors wrap externally supplied
//! bytes and reject writes.
//!
//! Not thread-safe: call sites that share a cursor across threads must hold
//! an external lock (the SCF publisher's mutex serves this role for its
//! scratch buffer).

use std::fmt;

use bytes::Bytes;

/// Growth granularity: capacity is always rounded up to the next multiple.
const GROWTH_ALIGN: usize = 1024;

/// Largest value encodable as a variable byte integer (4 bytes).
pub const MAX_VAR_INT: u32 = 268_435_455;

/// Errors raised by cursor operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorError {
    /// Write attempted on a read-only cursor
    NotWritable,
    /// Read or positioning past the end of available data
    OutOfBounds,
    /// Length-prefixed string is not valid UTF-8
    InvalidUtf8,
    /// Malformed or out-of-range variable byte integer
    InvalidVarInt,
}

impl fmt::Display for CursorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotWritable => write!(f, "cursor is not writeable"),
            Self::OutOfBounds => write!(f, "index out of bounds"),
            Self::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            Self::InvalidVarInt => write!(f, "invalid variable byte integer"),
        }
    }
}

impl std::error::Error for CursorError {}

enum Storage {
    /// Owned growable storage; the vec length is the current capacity.
    Writable(Vec<u8>),
    /// Wrapped external bytes; never written.
    ReadOnly(Bytes),
}

/// Append/advance binary buffer with big-endian multi-byte encoding
pub struct BinaryCursor {
    storage: Storage,
    position: usize,
}

impl BinaryCursor {
    /// Create an empty writable cursor
    pub fn new() -> Self {
        Self {
            storage: Storage::Writable(Vec::new()),
            position: 0,
        }
    }

    /// Create a writable cursor with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: Storage::Writable(vec![0u8; round_up(capacity)]),
            position: 0,
        }
    }

    /// Wrap external bytes as a read-only cursor positioned at 0
    pub fn wrap(data: Bytes) -> Self {
        Self {
            storage: Storage::ReadOnly(data),
            position: 0,
        }
    }

    /// Copy a slice into a read-only cursor positioned at 0
    pub fn wrap_slice(data: &[u8]) -> Self {
        Self::wrap(Bytes::copy_from_slice(data))
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.storage, Storage::ReadOnly(_))
    }

    /// Current read/write offset
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of bytes written so far. Only meaningful for writable cursors;
    /// read-only cursors report their wrapped data length via [`capacity`].
    ///
    /// [`capacity`]: BinaryCursor::capacity
    pub fn written_len(&self) -> usize {
        self.position
    }

    /// Total storage length: allocated capacity for writable cursors, the
    /// wrapped data length for read-only cursors.
    pub fn capacity(&self) -> usize {
        match &self.storage {
            Storage::Writable(v) => v.len(),
            Storage::ReadOnly(b) => b.len(),
        }
    }

    /// Move the cursor. Writable cursors grow to accommodate `position`;
    /// read-only cursors fail when it exceeds the data length.
    pub fn set_position(&mut self, position: usize) -> Result<(), CursorError> {
        match &mut self.storage {
            Storage::Writable(v) => {
                if position > v.len() {
                    v.resize(round_up(position), 0);
                }
                self.position = position;
                Ok(())
            }
            Storage::ReadOnly(b) => {
                if position > b.len() {
                    return Err(CursorError::OutOfBounds);
                }
                self.position = position;
                Ok(())
            }
        }
    }

    /// Return the cursor to writable state at position 0. A read-only cursor
    /// takes ownership of a copy of its wrapped bytes; storage is otherwise
    /// retained.
    pub fn reset(&mut self) {
        if let Storage::ReadOnly(b) = &self.storage {
            self.storage = Storage::Writable(b.to_vec());
        }
        self.position = 0;
    }

    /// The bytes written so far (writable) or the wrapped data (read-only)
    pub fn data(&self) -> &[u8] {
        match &self.storage {
            Storage::Writable(v) => &v[..self.position],
            Storage::ReadOnly(b) => b,
        }
    }

    /// Convert into a read-only cursor over exactly the written range
    pub fn freeze(self) -> Self {
        match self.storage {
            Storage::Writable(mut v) => {
                v.truncate(self.position);
                Self::wrap(Bytes::from(v))
            }
            Storage::ReadOnly(_) => Self {
                position: 0,
                ..self
            },
        }
    }

    /// CRC32 over `[0, data_len - exclude_trailing)`, where `data_len` is the
    /// written length for writable cursors and the wrapped length for
    /// read-only cursors. `exclude_trailing` skips a stored checksum suffix.
    pub fn checksum(&self, exclude_trailing: usize) -> Result<u32, CursorError> {
        let data = self.data();
        let end = data
            .len()
            .checked_sub(exclude_trailing)
            .ok_or(CursorError::OutOfBounds)?;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&data[..end]);
        Ok(hasher.finalize())
    }

    fn writable(&mut self, needed: usize) -> Result<&mut [u8], CursorError> {
        let position = self.position;
        match &mut self.storage {
            Storage::Writable(v) => {
                let required = position + needed;
                if required > v.len() {
                    v.resize(round_up(required), 0);
                }
                Ok(&mut v[position..position + needed])
            }
            Storage::ReadOnly(_) => Err(CursorError::NotWritable),
        }
    }

    fn readable(&self, needed: usize) -> Result<&[u8], CursorError> {
        let data = match &self.storage {
            Storage::Writable(v) => v.as_slice(),
            Storage::ReadOnly(b) => b.as_ref(),
        };
        if self.position + needed > data.len() {
            return Err(CursorError::OutOfBounds);
        }
        Ok(&data[self.position..self.position + needed])
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), CursorError> {
        self.writable(1)?[0] = value;
        self.position += 1;
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), CursorError> {
        self.write_u8(value as u8)
    }

    pub fn write_i16(&mut self, value: i16) -> Result<(), CursorError> {
        self.writable(2)?.copy_from_slice(&value.to_be_bytes());
        self.position += 2;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), CursorError> {
        self.writable(2)?.copy_from_slice(&value.to_be_bytes());
        self.position += 2;
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<(), CursorError> {
        self.writable(4)?.copy_from_slice(&value.to_be_bytes());
        self.position += 4;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), CursorError> {
        self.writable(4)?.copy_from_slice(&value.to_be_bytes());
        self.position += 4;
        Ok(())
    }

    pub fn write_i64(&mut self, value: i64) -> Result<(), CursorError> {
        self.writable(8)?.copy_from_slice(&value.to_be_bytes());
        self.position += 8;
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), CursorError> {
        self.writable(8)?.copy_from_slice(&value.to_be_bytes());
        self.position += 8;
        Ok(())
    }

    /// Write an MQTT-style Variable Byte Integer (1-4 bytes)
    pub fn write_var_int(&mut self, mut value: u32) -> Result<(), CursorError> {
        if value > MAX_VAR_INT {
            return Err(CursorError::InvalidVarInt);
        }
        loop {
            let mut byte = (value % 128) as u8;
            value /= 128;
            if value > 0 {
                byte |= 0x80;
            }
            self.write_u8(byte)?;
            if value == 0 {
                return Ok(());
            }
        }
    }

    /// Write a string as a 4-byte length prefix (bytes, not chars) followed
    /// by the raw bytes, with no encoding conversion
    pub fn write_str(&mut self, value: &str) -> Result<(), CursorError> {
        self.write_i32(value.len() as i32)?;
        self.write_bytes(value.as_bytes())
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> Result<(), CursorError> {
        self.writable(value.len())?.copy_from_slice(value);
        self.position += value.len();
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, CursorError> {
        let value = self.readable(1)?[0];
        self.position += 1;
        Ok(value)
    }

    pub fn read_bool(&mut self) -> Result<bool, CursorError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i16(&mut self) -> Result<i16, CursorError> {
        let b = self.readable(2)?;
        let value = i16::from_be_bytes([b[0], b[1]]);
        self.position += 2;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16, CursorError> {
        let b = self.readable(2)?;
        let value = u16::from_be_bytes([b[0], b[1]]);
        self.position += 2;
        Ok(value)
    }

    pub fn read_i32(&mut self) -> Result<i32, CursorError> {
        let b = self.readable(4)?;
        let value = i32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        self.position += 4;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> Result<u32, CursorError> {
        let b = self.readable(4)?;
        let value = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        self.position += 4;
        Ok(value)
    }

    pub fn read_i64(&mut self) -> Result<i64, CursorError> {
        let b = self.readable(8)?;
        let value = i64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
        self.position += 8;
        Ok(value)
    }

    pub fn read_u64(&mut self) -> Result<u64, CursorError> {
        let b = self.readable(8)?;
        let value = u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
        self.position += 8;
        Ok(value)
    }

    /// Read an MQTT-style Variable Byte Integer (1-4 bytes)
    pub fn read_var_int(&mut self) -> Result<u32, CursorError> {
        let mut multiplier: u32 = 1;
        let mut value: u32 = 0;
        for i in 0.. {
            if i >= 4 {
                return Err(CursorError::InvalidVarInt);
            }
            let byte = self.read_u8()?;
            value += ((byte & 0x7F) as u32) * multiplier;
            if (byte & 0x80) == 0 {
                break;
            }
            multiplier *= 128;
        }
        Ok(value)
    }

    /// Read a 4-byte length-prefixed string
    pub fn read_str(&mut self) -> Result<String, CursorError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(CursorError::OutOfBounds);
        }
        let bytes = self.read_bytes(len as usize)?;
        String::from_utf8(bytes).map_err(|_| CursorError::InvalidUtf8)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, CursorError> {
        let value = self.readable(len)?.to_vec();
        self.position += len;
        Ok(value)
    }
}

impl Default for BinaryCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BinaryCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryCursor")
            .field("read_only", &self.is_read_only())
            .field("position", &self.position)
            .field("capacity", &self.capacity())
            .finish()
    }
}

fn round_up(required: usize) -> usize {
    required.div_ceil(GROWTH_ALIGN) * GROWTH_ALIGN
}
