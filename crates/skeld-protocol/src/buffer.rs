//! Little-endian binary reader and writer.
//!
//! Every structure on the wire is built from the same handful of primitives:
//! fixed-width little-endian integers, "packed" variable-length integers,
//! packed-length-prefixed UTF-8 strings, and length-framed sub-messages of
//! the form `[packed len][tag u8][body]`.
//!
//! [`Reader`] never panics: every read checks the remaining length first and
//! reports [`ProtocolError::UnexpectedEof`] instead. [`Writer`] cannot fail.

use crate::ProtocolError;
use crate::types::Vector2;

/// Longest encoding of a packed `u32`.
const MAX_PACKED_LEN: usize = 5;

/// A cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Offset of the cursor from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Takes the next `n` bytes without copying.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(ProtocolError::UnexpectedEof {
                needed: n,
                remaining,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Takes everything that is left.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ProtocolError> {
        self.bytes(n).map(|_| ())
    }

    /// Splits off the next `n` bytes as an independent reader.
    ///
    /// Reads on the sub-reader can never run into the bytes that follow it.
    pub fn sub_reader(&mut self, n: usize) -> Result<Reader<'a>, ProtocolError> {
        self.bytes(n).map(Reader::new)
    }

    /// Reads a `[packed len][tag u8][body]` frame.
    ///
    /// The length covers the body only, not the tag.
    pub fn framed(&mut self) -> Result<(u8, Reader<'a>), ProtocolError> {
        let len = self.packed()? as usize;
        let tag = self.u8()?;
        let body = self.sub_reader(len)?;
        Ok((tag, body))
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn i8(&mut self) -> Result<i8, ProtocolError> {
        Ok(self.u8()? as i8)
    }

    pub fn bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        self.array().map(u16::from_le_bytes)
    }

    pub fn i16(&mut self) -> Result<i16, ProtocolError> {
        self.array().map(i16::from_le_bytes)
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        self.array().map(u32::from_le_bytes)
    }

    pub fn i32(&mut self) -> Result<i32, ProtocolError> {
        self.array().map(i32::from_le_bytes)
    }

    pub fn u64(&mut self) -> Result<u64, ProtocolError> {
        self.array().map(u64::from_le_bytes)
    }

    /// Reads a packed integer: seven data bits per byte, least significant
    /// group first, high bit set on every byte except the last.
    pub fn packed(&mut self) -> Result<u32, ProtocolError> {
        let mut value: u32 = 0;
        for i in 0..MAX_PACKED_LEN {
            let byte = self.u8()?;
            let bits = u32::from(byte & 0x7f);
            // The fifth byte only has room for the top four bits.
            if i == MAX_PACKED_LEN - 1 && (byte & 0x80 != 0 || bits > 0x0f) {
                return Err(ProtocolError::PackedOverflow);
            }
            value |= bits << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ProtocolError::PackedOverflow)
    }

    /// Reads a packed integer and reinterprets its bits as `i32`.
    pub fn packed_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(self.packed()? as i32)
    }

    /// Reads a packed length followed by that many UTF-8 bytes.
    pub fn string(&mut self) -> Result<String, ProtocolError> {
        let len = self.packed()? as usize;
        let raw = self.bytes(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Reads a lerped two-axis vector.
    pub fn vector2(&mut self) -> Result<Vector2, ProtocolError> {
        let x = self.u16()?;
        let y = self.u16()?;
        Ok(Vector2::from_lerped(x, y))
    }
}

/// A growable little-endian byte sink.
#[derive(Debug, Clone, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn i8(&mut self, value: i8) -> &mut Self {
        self.u8(value as u8)
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.u8(u8::from(value))
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn i16(&mut self, value: i16) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn packed(&mut self, mut value: u32) -> &mut Self {
        loop {
            let low = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(low);
                return self;
            }
            self.buf.push(low | 0x80);
        }
    }

    pub fn packed_i32(&mut self, value: i32) -> &mut Self {
        self.packed(value as u32)
    }

    pub fn string(&mut self, value: &str) -> &mut Self {
        self.packed(value.len() as u32);
        self.bytes(value.as_bytes())
    }

    pub fn vector2(&mut self, value: Vector2) -> &mut Self {
        let (x, y) = value.to_lerped();
        self.u16(x).u16(y)
    }

    /// Writes `[packed len][tag][body]`, where `body` is whatever `f` writes.
    pub fn write_framed(&mut self, tag: u8, f: impl FnOnce(&mut Writer)) -> &mut Self {
        let mut body = Writer::new();
        f(&mut body);
        self.packed(body.len() as u32);
        self.u8(tag);
        self.bytes(body.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_known_encodings() {
        let cases: &[(u32, &[u8])] = &[
            (0, &[0x00]),
            (0x7f, &[0x7f]),
            (0x80, &[0x80, 0x01]),
            (300, &[0xac, 0x02]),
            (u32::MAX, &[0xff, 0xff, 0xff, 0xff, 0x0f]),
        ];
        for (value, bytes) in cases {
            let mut w = Writer::new();
            w.packed(*value);
            assert_eq!(w.as_bytes(), *bytes, "encoding {value}");
            assert_eq!(Reader::new(bytes).packed().unwrap(), *value);
        }
    }

    #[test]
    fn test_packed_overflow_is_an_error() {
        let six = [0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        assert_eq!(
            Reader::new(&six).packed(),
            Err(ProtocolError::PackedOverflow)
        );
        let wide_fifth = [0xff, 0xff, 0xff, 0xff, 0x1f];
        assert_eq!(
            Reader::new(&wide_fifth).packed(),
            Err(ProtocolError::PackedOverflow)
        );
    }

    #[test]
    fn test_packed_truncated_reports_eof() {
        let err = Reader::new(&[0x80, 0x80]).packed().unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnexpectedEof {
                needed: 1,
                remaining: 0
            }
        );
    }

    #[test]
    fn test_negative_packed_i32_uses_five_bytes() {
        let mut w = Writer::new();
        w.packed_i32(-1);
        assert_eq!(w.len(), 5);
        assert_eq!(Reader::new(w.as_bytes()).packed_i32().unwrap(), -1);
    }

    #[test]
    fn test_fixed_width_is_little_endian() {
        let mut w = Writer::new();
        w.u16(0x0102).i32(-2).u32(0xdeadbeef);
        assert_eq!(
            w.as_bytes(),
            &[0x02, 0x01, 0xfe, 0xff, 0xff, 0xff, 0xef, 0xbe, 0xad, 0xde]
        );

        let mut r = Reader::new(w.as_bytes());
        assert_eq!(r.u16().unwrap(), 0x0102);
        assert_eq!(r.i32().unwrap(), -2);
        assert_eq!(r.u32().unwrap(), 0xdeadbeef);
        assert!(r.is_empty());
    }

    #[test]
    fn test_string_reads_length_prefix() {
        let mut w = Writer::new();
        w.string("OnlineGame");
        assert_eq!(w.as_bytes()[0], 10);

        let mut r = Reader::new(w.as_bytes());
        assert_eq!(r.string().unwrap(), "OnlineGame");
    }

    #[test]
    fn test_string_rejects_invalid_utf8() {
        let bytes = [0x02, 0xc3, 0x28];
        assert_eq!(Reader::new(&bytes).string(), Err(ProtocolError::InvalidUtf8));
    }

    #[test]
    fn test_string_longer_than_buffer() {
        let bytes = [0x05, b'a', b'b'];
        assert_eq!(
            Reader::new(&bytes).string(),
            Err(ProtocolError::UnexpectedEof {
                needed: 5,
                remaining: 2
            })
        );
    }

    #[test]
    fn test_sub_reader_is_bounded() {
        let bytes = [1, 2, 3, 4];
        let mut r = Reader::new(&bytes);
        let mut sub = r.sub_reader(2).unwrap();
        assert_eq!(sub.u8().unwrap(), 1);
        assert_eq!(sub.u8().unwrap(), 2);
        assert!(sub.u8().is_err());
        assert_eq!(r.position(), 2);
        assert_eq!(r.rest(), &[3, 4]);
    }

    #[test]
    fn test_framed_round_trip() {
        let mut w = Writer::new();
        w.write_framed(6, |body| {
            body.packed(3).string("Lobby");
        });
        assert_eq!(w.as_bytes()[..2], [7, 6]);

        let mut r = Reader::new(w.as_bytes());
        let (tag, mut body) = r.framed().unwrap();
        assert_eq!(tag, 6);
        assert_eq!(body.packed().unwrap(), 3);
        assert_eq!(body.string().unwrap(), "Lobby");
        assert!(r.is_empty());
    }
}
