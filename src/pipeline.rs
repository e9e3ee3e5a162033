//! The stream driver: parse → rewrite → emit.
//!
//! Parsing and emission are serial; per-file rewriting runs on the
//! blocking pool with up to `jobs` files in flight. `buffered` consumes
//! completed rewrites in submission order, so the output byte stream is
//! identical to the fully sequential one for any window size.

use std::io;
use std::sync::Arc;

use bstr::ByteSlice;
use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::FramedWrite;
use tracing::debug;

use crate::archive::{parse_nar, NarEncoder, NarError, NarEvent};
use crate::elf;
use crate::lang::{self, Classification};
use crate::rewrite::{basename, RewriteConfig};
use crate::stats::Stats;
use crate::text;

/// Rewrite one regular-file payload. Runs on the blocking pool; the
/// configuration is read-only and each call owns its buffers.
fn patch_file(path: &[u8], contents: Bytes, config: &RewriteConfig, stats: &Stats) -> Bytes {
    let file_name = basename(path);
    let mut patched: Option<Vec<u8>> = None;

    // ELF detection comes first: binaries are often large and
    // extensionless, and must never reach the text tokenizer.
    if elf::is_elf(&contents) {
        match elf::patch_elf(&contents, config) {
            Ok(result) => patched = result,
            Err(err) => {
                debug!(path = %path.as_bstr(), %err, "ELF rewrite failed, payload unchanged");
                stats.count_elf_failure();
            }
        }
    } else {
        match lang::classify(file_name, &contents) {
            Classification::Skip => {}
            Classification::Text(grammar) => {
                match text::patch_text(&contents, grammar, config) {
                    Ok(result) => patched = result,
                    Err(err) => {
                        debug!(path = %path.as_bstr(), %err, "tokenizer failed, shebang-only");
                        stats.count_tokenizer_fallback();
                        patched = text::patch_shebang(&contents, config);
                    }
                }
            }
            Classification::ShebangOnly => patched = text::patch_shebang(&contents, config),
        }
    }

    let structural = patched.map(Bytes::from).unwrap_or_else(|| contents.clone());
    let swept = config.sweep_mappings(structural);
    stats.count_file(contents.len(), swept != contents);
    swept
}

fn join_path(dirs: &[Bytes], name: &[u8]) -> Vec<u8> {
    let mut path = Vec::new();
    for dir in dirs {
        if dir.is_empty() {
            continue;
        }
        if !path.is_empty() {
            path.push(b'/');
        }
        path.extend_from_slice(dir);
    }
    if !name.is_empty() {
        if !path.is_empty() {
            path.push(b'/');
        }
        path.extend_from_slice(name);
    }
    path
}

/// Copy one NAR from `reader` to `writer`, rewriting file payloads and
/// symlink targets on the way through. `jobs` bounds the number of files
/// rewritten concurrently; 1 gives the strictly sequential model with
/// byte-identical output.
pub async fn process<R, W>(
    reader: R,
    writer: W,
    config: Arc<RewriteConfig>,
    stats: Arc<Stats>,
    jobs: usize,
) -> Result<(), NarError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut dirs: Vec<Bytes> = Vec::new();
    let rewritten = parse_nar(reader).map(move |event| -> BoxFuture<'static, Result<NarEvent, NarError>> {
        match event {
            Ok(NarEvent::File {
                name,
                executable,
                contents,
            }) => {
                let path = join_path(&dirs, &name);
                let config = Arc::clone(&config);
                let stats = Arc::clone(&stats);
                async move {
                    let contents = tokio::task::spawn_blocking(move || {
                        patch_file(&path, contents, &config, &stats)
                    })
                    .await
                    .map_err(io::Error::other)?;
                    Ok(NarEvent::File {
                        name,
                        executable,
                        contents,
                    })
                }
                .boxed()
            }
            Ok(NarEvent::Symlink { name, target }) => {
                let patched = Bytes::from(config.patch_symlink(&target));
                stats.count_symlink(patched != target);
                future::ready(Ok(NarEvent::Symlink {
                    name,
                    target: patched,
                }))
                .boxed()
            }
            Ok(NarEvent::StartDirectory { name }) => {
                stats.count_directory();
                dirs.push(name.clone());
                future::ready(Ok(NarEvent::StartDirectory { name })).boxed()
            }
            Ok(NarEvent::EndDirectory) => {
                dirs.pop();
                future::ready(Ok(NarEvent::EndDirectory)).boxed()
            }
            Err(err) => future::ready(Err(err)).boxed(),
        }
    });
    let rewritten = rewritten.buffered(jobs.max(1));
    futures::pin_mut!(rewritten);

    let mut sink = FramedWrite::new(writer, NarEncoder::new());
    sink.send_all(&mut rewritten).await?;
    sink.close().await?;
    Ok(())
}

#[cfg(test)]
mod unittests {
    use std::io::Cursor;
    use std::sync::Arc;

    use bytes::Bytes;
    use futures::TryStreamExt;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::rstest;

    use crate::archive::{parse_nar, test_data, write_nar, NarEvent};
    use crate::rewrite::RewriteConfig;
    use crate::stats::Stats;

    use super::process;

    async fn run_bytes(input: &[u8], config: RewriteConfig, jobs: usize) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        process(
            input,
            &mut out,
            Arc::new(config),
            Arc::new(Stats::new()),
            jobs,
        )
        .await
        .unwrap();
        out.into_inner()
    }

    #[rstest]
    #[case::text_file(test_data::text_file())]
    #[case::exec_file(test_data::exec_file())]
    #[case::empty_file(test_data::empty_file())]
    #[case::empty_dir(test_data::empty_dir())]
    #[case::dir_example(test_data::dir_example())]
    #[case::script_package(test_data::script_package())]
    #[tokio::test]
    async fn empty_config_is_identity(#[case] events: Vec<NarEvent>) {
        let input = write_nar(&events);
        let output = run_bytes(&input, RewriteConfig::default(), 4).await;
        assert_eq!(output, input);
    }

    #[tokio::test]
    async fn window_size_does_not_change_output() {
        let mut config = RewriteConfig::new("/data/app");
        config.set_libroot("/nix/store/OLD-glibc", "/nix/store/NEW-glibc-android");
        let input = write_nar(&test_data::script_package());
        let sequential = run_bytes(&input, config.clone(), 1).await;
        let parallel = run_bytes(&input, config, 8).await;
        assert_eq!(parallel, sequential);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn corrupt_elf_passes_through_unchanged() {
        let garbage = Bytes::from_static(b"\x7fELF\x02\x01\x01 not really an elf image");
        let events = vec![NarEvent::File {
            name: Bytes::new(),
            executable: true,
            contents: garbage,
        }];
        let input = write_nar(&events);
        let stats = Arc::new(Stats::new());
        let mut out = Cursor::new(Vec::new());
        process(
            &input[..],
            &mut out,
            Arc::new(RewriteConfig::new("/data/app")),
            Arc::clone(&stats),
            2,
        )
        .await
        .unwrap();
        assert_eq!(out.into_inner(), input);
        assert_eq!(
            stats
                .elf_failures
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn counts_are_kept() {
        let stats = Arc::new(Stats::new());
        let input = write_nar(&test_data::script_package());
        let mut out = Cursor::new(Vec::new());
        process(
            &input[..],
            &mut out,
            Arc::new(RewriteConfig::new("/data/app")),
            Arc::clone(&stats),
            4,
        )
        .await
        .unwrap();
        use std::sync::atomic::Ordering::Relaxed;
        assert_eq!(stats.directories.load(Relaxed), 3);
        assert_eq!(stats.files_rewritten.load(Relaxed), 1);
        assert_eq!(stats.symlinks_rewritten.load(Relaxed), 0);
    }

    #[tokio::test]
    async fn malformed_input_aborts() {
        let result = process(
            &b"garbage that is not a NAR"[..],
            &mut Cursor::new(Vec::new()),
            Arc::new(RewriteConfig::default()),
            Arc::new(Stats::new()),
            4,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rewritten_tree_shape_matches_input() {
        let mut config = RewriteConfig::new("/data/app");
        config.set_libroot("/nix/store/OLD-glibc", "/nix/store/NEW-glibc-android");
        let input = write_nar(&test_data::script_package());
        let output = run_bytes(&input, config, 4).await;
        let events: Vec<NarEvent> = parse_nar(&output[..]).try_collect().await.unwrap();
        let shape: Vec<_> = events
            .iter()
            .map(|event| match event {
                NarEvent::File {
                    name, executable, ..
                } => ("file", name.clone(), *executable),
                NarEvent::Symlink { name, .. } => ("symlink", name.clone(), false),
                NarEvent::StartDirectory { name } => ("dir", name.clone(), false),
                NarEvent::EndDirectory => ("end", Bytes::new(), false),
            })
            .collect();
        let expected: Vec<_> = test_data::script_package()
            .iter()
            .map(|event| match event {
                NarEvent::File {
                    name, executable, ..
                } => ("file", name.clone(), *executable),
                NarEvent::Symlink { name, .. } => ("symlink", name.clone(), false),
                NarEvent::StartDirectory { name } => ("dir", name.clone(), false),
                NarEvent::EndDirectory => ("end", Bytes::new(), false),
            })
            .collect();
        assert_eq!(shape, expected);
    }

    mod proptests {
        use std::collections::BTreeMap;

        use super::*;

        #[derive(Clone, Debug)]
        enum NarTree {
            Regular(bool, Vec<u8>),
            Symlink(String),
            Dir(BTreeMap<String, NarTree>),
        }

        impl NarTree {
            fn events(self, name: Bytes, out: &mut Vec<NarEvent>) {
                match self {
                    NarTree::Regular(executable, contents) => out.push(NarEvent::File {
                        name,
                        executable,
                        contents: contents.into(),
                    }),
                    NarTree::Symlink(target) => out.push(NarEvent::Symlink {
                        name,
                        target: Bytes::from(target),
                    }),
                    NarTree::Dir(entries) => {
                        out.push(NarEvent::StartDirectory { name });
                        for (entry_name, node) in entries {
                            node.events(Bytes::from(entry_name), out);
                        }
                        out.push(NarEvent::EndDirectory);
                    }
                }
            }
        }

        fn arb_filename() -> impl Strategy<Value = String> {
            "[a-zA-Z 0-9.?=+]+".prop_filter("not . or ..", |s| s != "." && s != "..")
        }

        fn arb_nar_tree() -> impl Strategy<Value = NarTree> {
            let leaf = prop_oneof![
                (any::<bool>(), any::<Vec<u8>>()).prop_map(|(e, c)| NarTree::Regular(e, c)),
                "[a-zA-Z0-9./_-]{1,40}".prop_map(NarTree::Symlink),
            ];
            leaf.prop_recursive(4, 24, 5, |inner| {
                prop::collection::btree_map(arb_filename(), inner, 0..5).prop_map(NarTree::Dir)
            })
        }

        fn arb_nar_events() -> impl Strategy<Value = Vec<NarEvent>> {
            arb_nar_tree().prop_map(|tree| {
                let mut events = Vec::new();
                tree.events(Bytes::new(), &mut events);
                events
            })
        }

        #[test]
        fn identity_on_arbitrary_trees() {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .unwrap();
            proptest!(|(events in arb_nar_events())| {
                let input = write_nar(&events);
                let output = runtime.block_on(run_bytes(&input, RewriteConfig::default(), 4));
                prop_assert_eq!(output, input.to_vec());
            });
        }

        #[test]
        fn parse_emit_round_trip() {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .unwrap();
            proptest!(|(events in arb_nar_events())| {
                let bytes = write_nar(&events);
                let parsed: Vec<NarEvent> = runtime
                    .block_on(async { parse_nar(&bytes[..]).try_collect().await })
                    .unwrap();
                prop_assert_eq!(parsed, events);
            });
        }
    }
}
