use anyhow::bail;
use bytes::{Buf, BufMut, Bytes};
use bytes_varint::{VarIntSupport, VarIntSupportMut};

//TODO extract to crate?

pub fn put_string(buf: &mut impl BufMut, s: &str) {
    buf.put_usize_varint(s.len());
    buf.put_slice(s.as_bytes());
}

pub fn try_get_string(buf: &mut impl Buf) -> anyhow::Result<String> {
    let raw = try_get_bytes(buf)?;
    let s = String::from_utf8(raw.to_vec())?;
    Ok(s)
}

/// length-prefixed opaque byte string
pub fn put_bytes(buf: &mut impl BufMut, data: &[u8]) {
    buf.put_usize_varint(data.len());
    buf.put_slice(data);
}

pub fn try_get_bytes(buf: &mut impl Buf) -> anyhow::Result<Bytes> {
    let len = buf.try_get_usize_varint()?;
    if buf.remaining() < len {
        bail!("buffer underflow: length prefix is {} but only {} bytes remain", len, buf.remaining());
    }
    Ok(buf.copy_to_bytes(len))
}

/// Optional u64: a presence flag followed by the value in network byte order
pub fn put_opt_u64(buf: &mut impl BufMut, value: Option<u64>) {
    match value {
        None => buf.put_u8(0),
        Some(v) => {
            buf.put_u8(1);
            buf.put_u64(v);
        }
    }
}

pub fn try_get_opt_u64(buf: &mut impl Buf) -> anyhow::Result<Option<u64>> {
    match buf.try_get_u8()? {
        0 => Ok(None),
        1 => Ok(Some(buf.try_get_u64()?)),
        b => bail!("invalid presence flag: {}", b),
    }
}
