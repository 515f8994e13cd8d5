//! Little-endian byte reader/writer with Bitcoin-style compact sizes.
//!
//! Used for masternode entries, quorum commitments and partial merkle trees,
//! which are hashed over their exact wire serialization.

use crate::error::TypesError;
use crate::hash::Hash256;

/// Encoded length of a compact size integer.
pub fn compact_size_len(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Cursor over a byte slice.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], TypesError> {
        if self.remaining() < n {
            return Err(TypesError::UnexpectedEof { need: n, offset: self.pos });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], TypesError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, TypesError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, TypesError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, TypesError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, TypesError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_hash(&mut self) -> Result<Hash256, TypesError> {
        Ok(Hash256::new(self.read_array()?))
    }

    pub fn read_compact_size(&mut self) -> Result<u64, TypesError> {
        match self.read_u8()? {
            0xfd => Ok(u64::from(self.read_u16()?)),
            0xfe => Ok(u64::from(self.read_u32()?)),
            0xff => self.read_u64(),
            n => Ok(u64::from(n)),
        }
    }

    /// Compact-size prefixed byte vector.
    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>, TypesError> {
        let len = self.read_compact_size()?;
        let len = usize::try_from(len).map_err(|_| TypesError::Other("length overflow".into()))?;
        Ok(self.read_bytes(len)?.to_vec())
    }
}

/// Growable output buffer.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_hash(&mut self, h: &Hash256) {
        self.write_bytes(h.as_bytes());
    }

    pub fn write_compact_size(&mut self, n: u64) {
        match n {
            0..=0xfc => self.write_u8(n as u8),
            0xfd..=0xffff => {
                self.write_u8(0xfd);
                self.write_u16(n as u16);
            }
            0x1_0000..=0xffff_ffff => {
                self.write_u8(0xfe);
                self.write_u32(n as u32);
            }
            _ => {
                self.write_u8(0xff);
                self.write_u64(n);
            }
        }
    }

    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_compact_size(bytes.len() as u64);
        self.write_bytes(bytes);
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_size_boundaries() {
        for n in [0u64, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, 0x1_0000_0000] {
            let mut w = Writer::new();
            w.write_compact_size(n);
            let bytes = w.into_inner();
            assert_eq!(bytes.len(), compact_size_len(n));
            assert_eq!(Reader::new(&bytes).read_compact_size().unwrap(), n);
        }
    }

    #[test]
    fn short_read_reports_offset() {
        let mut r = Reader::new(&[1, 2, 3]);
        r.read_u16().unwrap();
        assert_eq!(
            r.read_u32(),
            Err(TypesError::UnexpectedEof { need: 4, offset: 2 })
        );
    }
}
