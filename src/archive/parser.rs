use std::mem;

use async_stream::try_stream;
use bytes::Bytes;
use futures::Stream;
use tokio::io::AsyncRead;
use tracing::trace;

use crate::io::{read_bytes_limited, read_contents, read_u64_le};

use super::{NarError, NarEvent, NAR_VERSION_MAGIC_1};

const TAG_LIMIT: usize = 32;
const NAME_LIMIT: usize = 4096;

fn unexpected(expected: &str, found: &[u8]) -> NarError {
    NarError::UnexpectedTag {
        expected: expected.to_owned(),
        found: String::from_utf8_lossy(found).into_owned(),
    }
}

async fn expect_tag<R>(reader: &mut R, expected: &'static str) -> Result<(), NarError>
where
    R: AsyncRead + Unpin,
{
    let found = read_bytes_limited(reader, TAG_LIMIT).await?;
    if found.as_ref() != expected.as_bytes() {
        return Err(unexpected(expected, &found));
    }
    Ok(())
}

fn check_entry_name(name: &[u8]) -> Result<(), NarError> {
    if name.is_empty()
        || name == b"."
        || name == b".."
        || name.contains(&b'/')
        || name.contains(&b'\0')
    {
        return Err(NarError::InvalidFileName(
            String::from_utf8_lossy(name).into_owned(),
        ));
    }
    Ok(())
}

/// Parse one complete NAR from `source`, yielding nodes in input order.
///
/// The stream ends after the root node closes; trailing bytes on the
/// reader are left unread. Any framing violation terminates the stream
/// with an error; no resynchronization is attempted.
pub fn parse_nar<R>(source: R) -> impl Stream<Item = Result<NarEvent, NarError>>
where
    R: AsyncRead + Unpin,
{
    try_stream! {
        let mut source = source;
        let magic = read_bytes_limited(&mut source, NAR_VERSION_MAGIC_1.len())
            .await
            .map_err(|err| match err {
                NarError::StringTooLong(_) => NarError::BadMagic,
                other => other,
            })?;
        if magic.as_ref() != NAR_VERSION_MAGIC_1.as_bytes() {
            Err(NarError::BadMagic)?;
        }

        // One slot per open directory holding the previous entry name,
        // used to enforce ascending entry order.
        let mut open_dirs: Vec<Option<Bytes>> = Vec::new();
        let mut pending_name = Bytes::new();
        'node: loop {
            expect_tag(&mut source, "(").await?;
            expect_tag(&mut source, "type").await?;
            let kind = read_bytes_limited(&mut source, TAG_LIMIT).await?;
            let mut entered_directory = false;
            match kind.as_ref() {
                b"regular" => {
                    let mut tag = read_bytes_limited(&mut source, TAG_LIMIT).await?;
                    let mut executable = false;
                    if tag.as_ref() == b"executable" {
                        executable = true;
                        expect_tag(&mut source, "").await?;
                        tag = read_bytes_limited(&mut source, TAG_LIMIT).await?;
                    }
                    if tag.as_ref() != b"contents" {
                        Err(unexpected("contents", &tag))?;
                    }
                    let len = read_u64_le(&mut source).await?;
                    let contents = read_contents(&mut source, len).await?;
                    expect_tag(&mut source, ")").await?;
                    trace!(size = contents.len(), executable, "regular file");
                    yield NarEvent::File {
                        name: mem::take(&mut pending_name),
                        executable,
                        contents,
                    };
                }
                b"symlink" => {
                    expect_tag(&mut source, "target").await?;
                    let target = read_bytes_limited(&mut source, NAME_LIMIT).await?;
                    expect_tag(&mut source, ")").await?;
                    trace!(len = target.len(), "symlink");
                    yield NarEvent::Symlink {
                        name: mem::take(&mut pending_name),
                        target,
                    };
                }
                b"directory" => {
                    yield NarEvent::StartDirectory {
                        name: mem::take(&mut pending_name),
                    };
                    open_dirs.push(None);
                    entered_directory = true;
                }
                other => {
                    Err(NarError::UnknownNodeType(
                        String::from_utf8_lossy(other).into_owned(),
                    ))?;
                }
            }
            if open_dirs.is_empty() {
                // The root node was a file or symlink.
                break 'node;
            }
            // Walk back up: close entry wrappers and directories until the
            // next child node or the end of the archive.
            let mut close_entry = !entered_directory;
            loop {
                if close_entry {
                    expect_tag(&mut source, ")").await?;
                }
                let tag = read_bytes_limited(&mut source, TAG_LIMIT).await?;
                match tag.as_ref() {
                    b")" => {
                        yield NarEvent::EndDirectory;
                        open_dirs.pop();
                        if open_dirs.is_empty() {
                            break 'node;
                        }
                        close_entry = true;
                    }
                    b"entry" => {
                        expect_tag(&mut source, "(").await?;
                        expect_tag(&mut source, "name").await?;
                        let name = read_bytes_limited(&mut source, NAME_LIMIT).await?;
                        check_entry_name(&name)?;
                        if let Some(slot) = open_dirs.last_mut() {
                            if let Some(prev) = slot.as_ref() {
                                if name.as_ref() <= prev.as_ref() {
                                    Err(NarError::UnsortedDirectory)?;
                                }
                            }
                            *slot = Some(name.clone());
                        }
                        expect_tag(&mut source, "node").await?;
                        pending_name = name;
                        continue 'node;
                    }
                    other => {
                        Err(unexpected("entry", other))?;
                    }
                }
            }
        }
    }
}
