//! Positional field encoding.
//!
//! All integers are little-endian and fixed width, `bool` is one byte,
//! strings and sequences carry a `u32` length prefix.

use crate::error::{IpcError, IpcResult};

/// Upper bound for a single string or sequence length.
const MAX_FIELD_LEN: usize = 1 << 20;

/// A value with a positional wire representation.
pub trait Wire: Sized {
    fn encode(&self, w: &mut WireWriter);
    fn decode(r: &mut WireReader<'_>) -> IpcResult<Self>;
}

/// Append-only body builder.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_str(&mut self, v: &str) {
        self.put_u32(v.len() as u32);
        self.buf.extend_from_slice(v.as_bytes());
    }

    pub fn put_seq<T: Wire>(&mut self, items: &[T]) {
        self.put_u32(items.len() as u32);
        for item in items {
            item.encode(self);
        }
    }

    pub fn put<T: Wire>(&mut self, v: &T) {
        v.encode(self);
    }
}

/// Cursor over a received body.
#[derive(Debug)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> IpcResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                IpcError::Protocol(format!(
                    "body truncated: need {} bytes at {}, have {}",
                    n,
                    self.pos,
                    self.data.len()
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> IpcResult<[u8; N]> {
        let bytes = self.take(N)?;
        bytes
            .try_into()
            .map_err(|_| IpcError::Protocol(format!("expected {} bytes", N)))
    }

    pub fn get_u8(&mut self) -> IpcResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_bool(&mut self) -> IpcResult<bool> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(IpcError::Protocol(format!("invalid bool byte {:#04x}", other))),
        }
    }

    pub fn get_u32(&mut self) -> IpcResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn get_i32(&mut self) -> IpcResult<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn get_u64(&mut self) -> IpcResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn get_i64(&mut self) -> IpcResult<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn get_f32(&mut self) -> IpcResult<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    fn get_len(&mut self) -> IpcResult<usize> {
        let len = self.get_u32()? as usize;
        if len > MAX_FIELD_LEN {
            return Err(IpcError::Protocol(format!(
                "field length {} exceeds {}",
                len, MAX_FIELD_LEN
            )));
        }
        Ok(len)
    }

    pub fn get_str(&mut self) -> IpcResult<String> {
        let len = self.get_len()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| IpcError::Protocol(format!("invalid utf-8 string: {}", e)))
    }

    pub fn get_seq<T: Wire>(&mut self) -> IpcResult<Vec<T>> {
        let len = self.get_len()?;
        let mut items = Vec::with_capacity(len.min(64));
        for _ in 0..len {
            items.push(T::decode(self)?);
        }
        Ok(items)
    }

    pub fn get<T: Wire>(&mut self) -> IpcResult<T> {
        T::decode(self)
    }

    /// Fail if unread bytes remain.
    pub fn finish(&self) -> IpcResult<()> {
        if self.pos != self.data.len() {
            return Err(IpcError::Protocol(format!(
                "{} trailing bytes after body",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}

impl Wire for String {
    fn encode(&self, w: &mut WireWriter) {
        w.put_str(self);
    }

    fn decode(r: &mut WireReader<'_>) -> IpcResult<Self> {
        r.get_str()
    }
}
