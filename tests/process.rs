//! End-to-end runs of the full pipeline over in-memory archives.

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use pretty_assertions::assert_eq;

use patchnar::archive::{parse_nar, test_data, write_nar, NarEvent};
use patchnar::{process, RewriteConfig, Stats};

const PREFIX: &str = "/data/data/com.termux.nix/files/usr";
const OLD_GLIBC: &str = "/nix/store/OLD-glibc";
const NEW_GLIBC: &str = "/nix/store/NEW-glibc-android";

fn config() -> RewriteConfig {
    let mut config = RewriteConfig::new(PREFIX);
    config.set_libroot(OLD_GLIBC, NEW_GLIBC);
    config
}

async fn run_bytes(input: &[u8], config: RewriteConfig) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    process(input, &mut out, Arc::new(config), Arc::new(Stats::new()), 4)
        .await
        .unwrap();
    out.into_inner()
}

async fn run(events: Vec<NarEvent>, config: RewriteConfig) -> Vec<NarEvent> {
    let output = run_bytes(&write_nar(&events), config).await;
    parse_nar(&output[..]).try_collect().await.unwrap()
}

fn script(name: &'static str, contents: &str) -> Vec<NarEvent> {
    vec![
        NarEvent::StartDirectory { name: Bytes::new() },
        NarEvent::StartDirectory {
            name: Bytes::from_static(b"bin"),
        },
        NarEvent::File {
            name: Bytes::from(name.as_bytes().to_vec()),
            executable: true,
            contents: Bytes::from(contents.as_bytes().to_vec()),
        },
        NarEvent::EndDirectory,
        NarEvent::EndDirectory,
    ]
}

fn file_contents(events: &[NarEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            NarEvent::File { contents, .. } => {
                Some(String::from_utf8(contents.to_vec()).unwrap())
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn scenario_shebang_rewrite() {
    let events = script("hello", "#!/nix/store/HASH-bash/bin/bash\necho hi\n");
    let out = run(events, config()).await;
    assert_eq!(
        file_contents(&out),
        vec![format!("#!{PREFIX}/nix/store/HASH-bash/bin/bash\necho hi\n")]
    );
}

#[tokio::test]
async fn scenario_string_literal_rewrite() {
    let events = script("setup", "#!/bin/sh\nX=\"/nix/store/H-d/share\"\n");
    let out = run(events, config()).await;
    assert_eq!(
        file_contents(&out),
        vec![format!("#!/bin/sh\nX=\"{PREFIX}/nix/store/H-d/share\"\n")]
    );
}

#[tokio::test]
async fn scenario_library_root_in_comment() {
    let events = script(
        "env",
        "#!/bin/sh\n# uses /nix/store/OLD-glibc/lib/libc.so.6\n",
    );
    let out = run(events, config()).await;
    assert_eq!(
        file_contents(&out),
        vec![format!(
            "#!/bin/sh\n# uses {PREFIX}/nix/store/NEW-glibc-android/lib/libc.so.6\n"
        )]
    );
}

#[tokio::test]
async fn scenario_hash_mapping() {
    let mut config = config();
    assert!(config.add_mapping(b"/nix/store/ABC-bash", b"/nix/store/XYZ-bash"));
    let events = script("wrapper", "#!/nix/store/ABC-bash/bin/bash\n");
    let out = run(events, config).await;
    assert_eq!(
        file_contents(&out),
        vec![format!("#!{PREFIX}/nix/store/XYZ-bash/bin/bash\n")]
    );
}

#[tokio::test]
async fn scenario_symlink_prefixing() {
    let events = vec![
        NarEvent::StartDirectory { name: Bytes::new() },
        NarEvent::Symlink {
            name: Bytes::from_static(b"absolute"),
            target: Bytes::from_static(b"/nix/store/H-x/bin/x"),
        },
        NarEvent::Symlink {
            name: Bytes::from_static(b"relative"),
            target: Bytes::from_static(b"../lib/real"),
        },
        NarEvent::EndDirectory,
    ];
    let out = run(events, config()).await;
    let targets: Vec<Bytes> = out
        .iter()
        .filter_map(|event| match event {
            NarEvent::Symlink { target, .. } => Some(target.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        targets,
        vec![
            Bytes::from(format!("{PREFIX}/nix/store/H-x/bin/x").into_bytes()),
            Bytes::from_static(b"../lib/real"),
        ]
    );
}

#[tokio::test]
async fn scenario_length_mismatch_mapping_is_skipped() {
    let mut config = config();
    assert!(!config.add_mapping(
        b"/nix/store/short-x",
        b"/nix/store/muchlongerhash-x-extra"
    ));
    let events = script("tool", "#!/nix/store/short-x/bin/sh\n");
    let out = run(events, config).await;
    assert_eq!(
        file_contents(&out),
        vec![format!("#!{PREFIX}/nix/store/short-x/bin/sh\n")]
    );
}

#[tokio::test]
async fn env_shebang_is_untouched() {
    let events = script("greet", "#!/usr/bin/env bash\necho hi\n");
    let out = run(events, config()).await;
    assert_eq!(file_contents(&out), vec!["#!/usr/bin/env bash\necho hi\n"]);
}

#[tokio::test]
async fn empty_directories_and_files_are_preserved() {
    for events in [
        test_data::empty_dir(),
        test_data::empty_dir_in_dir(),
        test_data::empty_file(),
        test_data::exec_file(),
    ] {
        let input = write_nar(&events);
        let output = run_bytes(&input, config()).await;
        assert_eq!(output, input);
    }
}

#[tokio::test]
async fn hash_sweep_reaches_unclassified_payloads() {
    let mut config = config();
    assert!(config.add_mapping(b"/nix/store/AAAA-libz", b"/nix/store/BBBB-libz"));
    let events = vec![NarEvent::File {
        name: Bytes::new(),
        executable: false,
        contents: Bytes::from_static(b"\x00\x01binary blob AAAA-libz reference\x02"),
    }];
    let out = run(events, config).await;
    match &out[0] {
        NarEvent::File { contents, .. } => {
            assert_eq!(&contents[..], b"\x00\x01binary blob BBBB-libz reference\x02");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn second_run_is_a_fixed_point() {
    let events = vec![
        NarEvent::StartDirectory { name: Bytes::new() },
        NarEvent::StartDirectory {
            name: Bytes::from_static(b"bin"),
        },
        NarEvent::File {
            name: Bytes::from_static(b"hello"),
            executable: true,
            contents: Bytes::from_static(
                b"#!/nix/store/HASH-bash/bin/bash\nX=\"/nix/store/H-d/share\"\n# /nix/store/OLD-glibc/lib\n",
            ),
        },
        NarEvent::Symlink {
            name: Bytes::from_static(b"link"),
            target: Bytes::from_static(b"/nix/store/H-x/bin/x"),
        },
        NarEvent::EndDirectory,
        NarEvent::EndDirectory,
    ];
    let first = run_bytes(&write_nar(&events), config()).await;
    let second = run_bytes(&first, config()).await;
    assert_eq!(second, first);
}
