use bytes::{Bytes, BytesMut};
use tokio_util::codec::Encoder;
use tracing::trace;

use crate::io::put_nar_slice;

use super::{NarError, NarEvent, NAR_VERSION_MAGIC_1};

/// Re-emits [`NarEvent`]s as NAR bytes.
///
/// The encoder assumes a well-formed event sequence (as produced by the
/// parser): one root node, start/end directory events balanced, entries
/// already in ascending name order.
#[derive(Debug, Default)]
pub struct NarEncoder {
    level: usize,
    started: bool,
}

impl NarEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_node(&mut self, dst: &mut BytesMut, name: &[u8]) {
        if !self.started {
            put_nar_slice(dst, NAR_VERSION_MAGIC_1.as_bytes());
            self.started = true;
        }
        if self.level > 0 {
            put_nar_slice(dst, b"entry");
            put_nar_slice(dst, b"(");
            put_nar_slice(dst, b"name");
            put_nar_slice(dst, name);
            put_nar_slice(dst, b"node");
        }
        put_nar_slice(dst, b"(");
        put_nar_slice(dst, b"type");
    }

    fn close_node(&mut self, dst: &mut BytesMut) {
        put_nar_slice(dst, b")");
        if self.level > 0 {
            // Also close the "entry" wrapper around a nested node.
            put_nar_slice(dst, b")");
        }
    }
}

impl Encoder<NarEvent> for NarEncoder {
    type Error = NarError;

    fn encode(&mut self, item: NarEvent, dst: &mut BytesMut) -> Result<(), Self::Error> {
        trace!(level = self.level, ?item, "encode");
        match item {
            NarEvent::File {
                name,
                executable,
                contents,
            } => {
                self.open_node(dst, &name);
                put_nar_slice(dst, b"regular");
                if executable {
                    put_nar_slice(dst, b"executable");
                    put_nar_slice(dst, b"");
                }
                put_nar_slice(dst, b"contents");
                put_nar_slice(dst, &contents);
                self.close_node(dst);
            }
            NarEvent::Symlink { name, target } => {
                self.open_node(dst, &name);
                put_nar_slice(dst, b"symlink");
                put_nar_slice(dst, b"target");
                put_nar_slice(dst, &target);
                self.close_node(dst);
            }
            NarEvent::StartDirectory { name } => {
                self.open_node(dst, &name);
                put_nar_slice(dst, b"directory");
                self.level += 1;
            }
            NarEvent::EndDirectory => {
                self.level -= 1;
                self.close_node(dst);
            }
        }
        Ok(())
    }
}

/// Encode a full event sequence into one buffer. Mostly useful for tests
/// and small in-memory archives.
pub fn write_nar<'e, E>(events: E) -> Bytes
where
    E: IntoIterator<Item = &'e NarEvent>,
{
    let mut encoder = NarEncoder::new();
    let mut buf = BytesMut::new();
    for event in events {
        encoder
            .encode(event.clone(), &mut buf)
            .expect("BUG: in-memory NAR encoding failed");
    }
    buf.freeze()
}

#[cfg(test)]
mod unittests {
    use pretty_assertions::assert_eq;

    use crate::archive::test_data;

    use super::write_nar;

    #[test]
    fn golden_text_file() {
        let expected: &[u8] = b"\x0d\0\0\0\0\0\0\0nix-archive-1\0\0\0\
              \x01\0\0\0\0\0\0\0(\0\0\0\0\0\0\0\
              \x04\0\0\0\0\0\0\0type\0\0\0\0\
              \x07\0\0\0\0\0\0\0regular\0\
              \x08\0\0\0\0\0\0\0contents\
              \x0c\0\0\0\0\0\0\0Hello world!\0\0\0\0\
              \x01\0\0\0\0\0\0\0)\0\0\0\0\0\0\0";
        assert_eq!(&write_nar(&test_data::text_file())[..], expected);
    }

    #[test]
    fn golden_exec_file_marker() {
        let bytes = write_nar(&test_data::exec_file());
        let marker: &[u8] = b"\x0a\0\0\0\0\0\0\0executable\0\0\0\0\0\0\0\0\0\0\0\0\0\0";
        assert!(bytes
            .windows(marker.len())
            .any(|window| window == marker));
    }

    #[test]
    fn golden_symlink() {
        let expected: &[u8] = b"\x0d\0\0\0\0\0\0\0nix-archive-1\0\0\0\
              \x01\0\0\0\0\0\0\0(\0\0\0\0\0\0\0\
              \x04\0\0\0\0\0\0\0type\0\0\0\0\
              \x07\0\0\0\0\0\0\0symlink\0\
              \x06\0\0\0\0\0\0\0target\0\0\
              \x07\0\0\0\0\0\0\0../deep\0\
              \x01\0\0\0\0\0\0\0)\0\0\0\0\0\0\0";
        assert_eq!(&write_nar(&test_data::symlink())[..], expected);
    }
}
