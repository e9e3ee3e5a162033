//! Wire primitives for the NAR format: little-endian 64-bit length
//! prefixes, 8-byte zero padding, and the buffered read/write helpers the
//! codec is built from.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::archive::NarError;

pub const ZEROS: [u8; 8] = [0u8; 8];

pub const fn calc_aligned(len: u64) -> u64 {
    len.wrapping_add(7) & !7
}

pub const fn calc_padding(len: u64) -> usize {
    calc_aligned(len).wrapping_sub(len) as usize
}

/// A short read means the archive was cut off, which is a framing error
/// rather than an I/O failure.
fn eof_is_truncation(err: io::Error) -> NarError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        NarError::Truncated
    } else {
        NarError::Io(err)
    }
}

pub(crate) async fn read_u64_le<R>(reader: &mut R) -> Result<u64, NarError>
where
    R: AsyncRead + Unpin,
{
    reader.read_u64_le().await.map_err(eof_is_truncation)
}

/// Consume the zero padding that aligns a `size`-byte string to the next
/// 8-byte boundary.
pub(crate) async fn read_padding<R>(reader: &mut R, size: u64) -> Result<(), NarError>
where
    R: AsyncRead + Unpin,
{
    let padding = calc_padding(size);
    if padding == 0 {
        return Ok(());
    }
    let mut buf = [0u8; 8];
    reader
        .read_exact(&mut buf[..padding])
        .await
        .map_err(eof_is_truncation)?;
    if buf[..padding].iter().any(|b| *b != 0) {
        return Err(NarError::BadPadding);
    }
    Ok(())
}

/// Read one length-prefixed padded string, rejecting lengths above
/// `limit`. Tags, entry names and symlink targets are all bounded; an
/// oversized length here means a corrupt stream, not a big file.
pub(crate) async fn read_bytes_limited<R>(reader: &mut R, limit: usize) -> Result<Bytes, NarError>
where
    R: AsyncRead + Unpin,
{
    let len = read_u64_le(reader).await?;
    if len > limit as u64 {
        return Err(NarError::StringTooLong(len));
    }
    let mut buf = BytesMut::zeroed(len as usize);
    reader
        .read_exact(&mut buf)
        .await
        .map_err(eof_is_truncation)?;
    read_padding(reader, len).await?;
    Ok(buf.freeze())
}

/// Read a file payload of a length already taken from the stream.
pub(crate) async fn read_contents<R>(reader: &mut R, len: u64) -> Result<Bytes, NarError>
where
    R: AsyncRead + Unpin,
{
    let size = usize::try_from(len).map_err(|_| NarError::StringTooLong(len))?;
    let mut buf = BytesMut::zeroed(size);
    reader
        .read_exact(&mut buf)
        .await
        .map_err(eof_is_truncation)?;
    read_padding(reader, len).await?;
    Ok(buf.freeze())
}

/// Append one length-prefixed padded string to the output buffer.
pub(crate) fn put_nar_slice(dst: &mut BytesMut, src: &[u8]) {
    dst.put_u64_le(src.len() as u64);
    dst.put_slice(src);
    dst.put_slice(&ZEROS[..calc_padding(src.len() as u64)]);
}
