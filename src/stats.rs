//! Stream statistics. Counters are the only state shared between
//! concurrent rewrites, so they are plain relaxed atomics; nothing
//! correctness-bearing reads them.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

#[derive(Debug, Default)]
pub struct Stats {
    pub files_rewritten: AtomicU64,
    pub symlinks_rewritten: AtomicU64,
    pub directories: AtomicU64,
    pub payload_bytes: AtomicU64,
    pub elf_failures: AtomicU64,
    pub tokenizer_fallbacks: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Stats::default()
    }

    pub(crate) fn count_file(&self, payload_len: usize, rewritten: bool) {
        self.payload_bytes
            .fetch_add(payload_len as u64, Ordering::Relaxed);
        if rewritten {
            self.files_rewritten.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn count_symlink(&self, rewritten: bool) {
        if rewritten {
            self.symlinks_rewritten.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn count_directory(&self) {
        self.directories.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_elf_failure(&self) {
        self.elf_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_tokenizer_fallback(&self) {
        self.tokenizer_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn log_summary(&self) {
        info!(
            files_rewritten = self.files_rewritten.load(Ordering::Relaxed),
            symlinks_rewritten = self.symlinks_rewritten.load(Ordering::Relaxed),
            directories = self.directories.load(Ordering::Relaxed),
            payload_bytes = self.payload_bytes.load(Ordering::Relaxed),
            elf_failures = self.elf_failures.load(Ordering::Relaxed),
            tokenizer_fallbacks = self.tokenizer_fallbacks.load(Ordering::Relaxed),
            "stream complete"
        );
    }
}
