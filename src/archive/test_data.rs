//! Shared archive fixtures for the test suites.

use bytes::Bytes;

use super::NarEvent;

pub fn text_file() -> Vec<NarEvent> {
    vec![NarEvent::File {
        name: Bytes::new(),
        executable: false,
        contents: Bytes::from_static(b"Hello world!"),
    }]
}

pub fn exec_file() -> Vec<NarEvent> {
    vec![NarEvent::File {
        name: Bytes::new(),
        executable: true,
        contents: Bytes::from_static(b"Very cool stuff"),
    }]
}

pub fn empty_file() -> Vec<NarEvent> {
    vec![NarEvent::File {
        name: Bytes::new(),
        executable: false,
        contents: Bytes::new(),
    }]
}

pub fn empty_file_in_dir() -> Vec<NarEvent> {
    vec![
        NarEvent::StartDirectory { name: Bytes::new() },
        NarEvent::File {
            name: Bytes::from_static(b"a=?.0.aA"),
            executable: false,
            contents: Bytes::new(),
        },
        NarEvent::EndDirectory,
    ]
}

pub fn empty_dir() -> Vec<NarEvent> {
    vec![
        NarEvent::StartDirectory { name: Bytes::new() },
        NarEvent::EndDirectory,
    ]
}

pub fn empty_dir_in_dir() -> Vec<NarEvent> {
    vec![
        NarEvent::StartDirectory { name: Bytes::new() },
        NarEvent::StartDirectory {
            name: Bytes::from_static(b"empty"),
        },
        NarEvent::EndDirectory,
        NarEvent::EndDirectory,
    ]
}

pub fn symlink() -> Vec<NarEvent> {
    vec![NarEvent::Symlink {
        name: Bytes::new(),
        target: Bytes::from_static(b"../deep"),
    }]
}

pub fn dir_example() -> Vec<NarEvent> {
    vec![
        NarEvent::StartDirectory { name: Bytes::new() },
        NarEvent::StartDirectory {
            name: Bytes::from_static(b"dir"),
        },
        NarEvent::StartDirectory {
            name: Bytes::from_static(b"more"),
        },
        NarEvent::File {
            name: Bytes::from_static(b"Deep"),
            executable: true,
            contents: Bytes::from_static(b"Very cool stuff"),
        },
        NarEvent::StartDirectory {
            name: Bytes::from_static(b"deep"),
        },
        NarEvent::File {
            name: Bytes::from_static(b"empty.keep"),
            executable: false,
            contents: Bytes::new(),
        },
        NarEvent::Symlink {
            name: Bytes::from_static(b"loop"),
            target: Bytes::from_static(b"../deep"),
        },
        NarEvent::Symlink {
            name: Bytes::from_static(b"test"),
            target: Bytes::from_static(b"/etc/ssh/sshd_config"),
        },
        NarEvent::EndDirectory,
        NarEvent::EndDirectory,
        NarEvent::EndDirectory,
        NarEvent::File {
            name: Bytes::from_static(b"testing.txt"),
            executable: false,
            contents: Bytes::from_static(b"Hello world!"),
        },
        NarEvent::EndDirectory,
    ]
}

/// A small package tree mixing scripts, symlinks and data, used by the
/// pipeline tests.
pub fn script_package() -> Vec<NarEvent> {
    vec![
        NarEvent::StartDirectory { name: Bytes::new() },
        NarEvent::StartDirectory {
            name: Bytes::from_static(b"bin"),
        },
        NarEvent::File {
            name: Bytes::from_static(b"hello"),
            executable: true,
            contents: Bytes::from_static(b"#!/nix/store/zzmh6q4n5rhlk25vg2jcgrxgcpvy3j7a-bash/bin/bash\necho hi\n"),
        },
        NarEvent::Symlink {
            name: Bytes::from_static(b"hi"),
            target: Bytes::from_static(b"hello"),
        },
        NarEvent::EndDirectory,
        NarEvent::StartDirectory {
            name: Bytes::from_static(b"share"),
        },
        NarEvent::File {
            name: Bytes::from_static(b"data.bin"),
            executable: false,
            contents: Bytes::from_static(b"\x00\x01\x02\x03 no store paths here"),
        },
        NarEvent::EndDirectory,
        NarEvent::EndDirectory,
    ]
}
