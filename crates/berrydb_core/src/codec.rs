//! Little-endian binary encoding helpers shared by the log, the catalog and
//! checkpoint images.

use crate::error::{CoreError, CoreResult};

/// Computes CRC32 checksum for data (IEEE polynomial).
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

/// Appends a length-prefixed byte string.
pub(crate) fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> CoreResult<()> {
    put_len(buf, bytes.len())?;
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Appends a `u32` length, rejecting lengths that do not fit.
pub(crate) fn put_len(buf: &mut Vec<u8>, len: usize) -> CoreResult<()> {
    let len = u32::try_from(len)
        .map_err(|_| CoreError::invalid_operation(format!("length {len} exceeds u32")))?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

/// Appends a duplicate list: count followed by each value.
pub(crate) fn put_values(buf: &mut Vec<u8>, values: &[Vec<u8>]) -> CoreResult<()> {
    put_len(buf, values.len())?;
    for value in values {
        put_bytes(buf, value)?;
    }
    Ok(())
}

/// Bounds-checked reader over an encoded payload.
///
/// Every short read is reported through the error constructor supplied at
/// creation, so the same reader serves log records (corruption) and files
/// (format errors).
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    fail: fn(String) -> CoreError,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8], fail: fn(String) -> CoreError) -> Self {
        Self { data, pos: 0, fail }
    }

    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                (self.fail)(format!(
                    "unexpected end of data: need {len} bytes at offset {}",
                    self.pos
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> CoreResult<u16> {
        let mut bytes = [0u8; 2];
        bytes.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(bytes))
    }

    pub(crate) fn u32(&mut self) -> CoreResult<u32> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(bytes))
    }

    pub(crate) fn u64(&mut self) -> CoreResult<u64> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(bytes))
    }

    pub(crate) fn raw(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        self.take(len)
    }

    pub(crate) fn bytes(&mut self) -> CoreResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub(crate) fn values(&mut self) -> CoreResult<Vec<Vec<u8>>> {
        let count = self.u32()? as usize;
        // Each value carries at least its 4-byte length.
        if count > self.remaining() / 4 {
            return Err((self.fail)(format!("value count {count} exceeds payload")));
        }
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.bytes()?);
        }
        Ok(values)
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Fails if any bytes are left unread.
    pub(crate) fn finish(&self, what: &str) -> CoreResult<()> {
        if self.pos != self.data.len() {
            return Err((self.fail)(format!(
                "trailing bytes in {what}: expected {} bytes, got {}",
                self.pos,
                self.data.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_value() {
        // Known test vector: "123456789" should give 0xCBF43926
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn reader_reports_short_reads() {
        let mut buf = Vec::new();
        put_bytes(&mut buf, b"abc").unwrap();
        buf.truncate(5);
        let mut reader = Reader::new(&buf, CoreError::invalid_format);
        let err = reader.bytes().unwrap_err();
        assert!(matches!(err, CoreError::InvalidFormat { .. }));
    }

    #[test]
    fn reader_rejects_trailing_bytes() {
        let mut buf = Vec::new();
        put_values(&mut buf, &[b"x".to_vec(), b"yz".to_vec()]).unwrap();
        buf.push(0);
        let mut reader = Reader::new(&buf, CoreError::log_corruption);
        assert_eq!(reader.values().unwrap(), vec![b"x".to_vec(), b"yz".to_vec()]);
        assert!(reader.finish("values").is_err());
    }
}
