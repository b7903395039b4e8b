//! Little-endian blob writer and reader used by controller serialization.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use crate::error::LoadError;
use crate::graph::Vec2;

/// Append-only little-endian encoder.
#[derive(Default, Debug)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u32(&mut self, v: u32) {
        let mut raw = [0u8; 4];
        LittleEndian::write_u32(&mut raw, v);
        self.buf.extend_from_slice(&raw);
    }

    pub fn i32(&mut self, v: i32) {
        let mut raw = [0u8; 4];
        LittleEndian::write_i32(&mut raw, v);
        self.buf.extend_from_slice(&raw);
    }

    pub fn f32(&mut self, v: f32) {
        let mut raw = [0u8; 4];
        LittleEndian::write_f32(&mut raw, v);
        self.buf.extend_from_slice(&raw);
    }

    pub fn vec2(&mut self, v: Vec2) {
        self.f32(v.x);
        self.f32(v.y);
    }

    /// Length-prefixed (i32) raw bytes.
    pub fn bytes(&mut self, bytes: &[u8]) {
        self.i32(bytes.len() as i32);
        self.buf.extend_from_slice(bytes);
    }

    pub fn str(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    pub fn count(&mut self, n: usize) {
        self.i32(n as i32);
    }
}

/// Bounds-checked decoder. Every read names what it was reading so truncation errors are
/// actionable.
#[derive(Debug)]
pub struct Reader<'a> {
    rest: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { rest: bytes }
    }

    pub fn remaining(&self) -> usize {
        self.rest.len()
    }

    pub fn u8(&mut self, what: &'static str) -> Result<u8, LoadError> {
        self.rest.read_u8().map_err(|_| LoadError::Truncated { what })
    }

    pub fn u32(&mut self, what: &'static str) -> Result<u32, LoadError> {
        self.rest
            .read_u32::<LittleEndian>()
            .map_err(|_| LoadError::Truncated { what })
    }

    pub fn i32(&mut self, what: &'static str) -> Result<i32, LoadError> {
        self.rest
            .read_i32::<LittleEndian>()
            .map_err(|_| LoadError::Truncated { what })
    }

    pub fn f32(&mut self, what: &'static str) -> Result<f32, LoadError> {
        self.rest
            .read_f32::<LittleEndian>()
            .map_err(|_| LoadError::Truncated { what })
    }

    pub fn vec2(&mut self, what: &'static str) -> Result<Vec2, LoadError> {
        Ok(Vec2 {
            x: self.f32(what)?,
            y: self.f32(what)?,
        })
    }

    /// Non-negative i32 count, bounded by the bytes left so corrupt counts cannot request huge
    /// allocations.
    pub fn count(&mut self, what: &'static str) -> Result<usize, LoadError> {
        let raw = self.i32(what)?;
        if raw < 0 || raw as usize > self.rest.len() {
            return Err(LoadError::BadCount { what, count: raw });
        }
        Ok(raw as usize)
    }

    pub fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], LoadError> {
        if len > self.rest.len() {
            return Err(LoadError::Truncated { what });
        }
        let (head, tail) = self.rest.split_at(len);
        self.rest = tail;
        Ok(head)
    }

    pub fn bytes(&mut self, what: &'static str) -> Result<&'a [u8], LoadError> {
        let len = self.count(what)?;
        self.take(len, what)
    }

    pub fn string(&mut self, what: &'static str) -> Result<String, LoadError> {
        let raw = self.bytes(what)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| LoadError::InvalidUtf8 { what })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_reports_what_was_truncated() {
        let mut w = Writer::new();
        w.i32(-1);
        w.str("idle");
        w.f32(0.5);
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        assert_eq!(r.i32("uid").unwrap(), -1);
        assert_eq!(r.string("name").unwrap(), "idle");
        assert_eq!(r.f32("blend").unwrap(), 0.5);
        assert!(matches!(
            r.u32("magic"),
            Err(LoadError::Truncated { what: "magic" })
        ));
    }

    #[test]
    fn counts_must_fit_the_remaining_stream() {
        let mut w = Writer::new();
        w.i32(1000);
        let bytes = w.into_bytes();
        assert!(matches!(
            Reader::new(&bytes).count("children"),
            Err(LoadError::BadCount { count: 1000, .. })
        ));

        let mut w = Writer::new();
        w.bytes(&[0xff, 0xfe]);
        let bytes = w.into_bytes();
        assert!(matches!(
            Reader::new(&bytes).string("name"),
            Err(LoadError::InvalidUtf8 { what: "name" })
        ));
    }
}
