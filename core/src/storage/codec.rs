//! Primitive readers and writers for the on-disk records.
//!
//! All integers are little-endian with explicit widths; variable-length
//! payloads carry a u32 length prefix. Every record ends with a CRC32 of the
//! preceding bytes.

use super::StorageError;

/// Appends a u32 CRC32 trailer covering the current buffer contents.
pub(crate) fn append_crc32(buffer: &mut Vec<u8>) {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(buffer);
    let crc = hasher.finalize();
    buffer.extend_from_slice(&crc.to_le_bytes());
}

/// Checks the trailing CRC32 and returns the record body without it.
pub(crate) fn verify_crc32(bytes: &[u8]) -> Result<&[u8], StorageError> {
    if bytes.len() < 4 {
        return Err(StorageError::Corrupt(
            "record too short for a CRC trailer".to_string(),
        ));
    }
    let (body, trailer) = bytes.split_at(bytes.len() - 4);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    let calculated = hasher.finalize();
    let mut stored = [0_u8; 4];
    stored.copy_from_slice(trailer);
    if calculated != u32::from_le_bytes(stored) {
        return Err(StorageError::Corrupt("CRC mismatch".to_string()));
    }
    Ok(body)
}

/// Appends a u32 length prefix followed by the payload bytes.
pub(crate) fn put_bytes(buffer: &mut Vec<u8>, payload: &[u8]) {
    buffer.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buffer.extend_from_slice(payload);
}

/// Appends a length-prefixed UTF-8 string.
pub(crate) fn put_string(buffer: &mut Vec<u8>, value: &str) {
    put_bytes(buffer, value.as_bytes());
}

/// Sequential reader over a record body with truncation checks.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], StorageError> {
        let end = self.position.checked_add(len).ok_or_else(truncated)?;
        if end > self.bytes.len() {
            return Err(truncated());
        }
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    pub(crate) fn read_array<const N: usize>(&mut self) -> Result<[u8; N], StorageError> {
        let mut out = [0_u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, StorageError> {
        Ok(u16::from_le_bytes(self.read_array::<2>()?))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, StorageError> {
        Ok(u32::from_le_bytes(self.read_array::<4>()?))
    }

    /// Reads a u32 length prefix and the payload it announces.
    pub(crate) fn read_bytes(&mut self) -> Result<&'a [u8], StorageError> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub(crate) fn read_string(&mut self) -> Result<String, StorageError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| StorageError::Corrupt("invalid UTF-8 in record".to_string()))
    }

    /// Asserts that the record body has been fully consumed.
    pub(crate) fn finish(&self) -> Result<(), StorageError> {
        if self.position != self.bytes.len() {
            return Err(StorageError::Corrupt(format!(
                "{} trailing bytes after record",
                self.bytes.len() - self.position
            )));
        }
        Ok(())
    }
}

fn truncated() -> StorageError {
    StorageError::Corrupt("truncated record".to_string())
}
