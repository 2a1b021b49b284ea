// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::sync::LazyLock;
use testadapter_metadata::worker::TestUi;
use tracing::{debug, warn};

static BDD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(x?describe|x?context|x?it|x?specify)(\.only|\.skip)?\s*\(")
        .expect("bdd pattern is valid")
});

static TDD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(suite|test)(\.only|\.skip)?\s*\(").expect("tdd pattern is valid")
});

static EXPORTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bmodule\.exports\b|\bexports\.\w+\s*=").expect("exports pattern is valid")
});

fn declaration_pattern(ui: TestUi) -> &'static Regex {
    match ui {
        TestUi::Bdd => &BDD,
        TestUi::Tdd | TestUi::Qunit => &TDD,
        TestUi::Exports => &EXPORTS,
    }
}

/// Returns true if `contents` looks like it declares tests for `ui`.
pub(crate) fn declares_tests(contents: &str, ui: TestUi) -> bool {
    declaration_pattern(ui).is_match(contents)
}

/// Keeps the files that look like they declare tests for `ui`, in order.
///
/// This is a best-effort static check: files that can't be read are dropped with a warning and
/// the check itself never fails.
pub(crate) async fn retain_declaring(files: &[Utf8PathBuf], ui: TestUi) -> Vec<Utf8PathBuf> {
    let mut kept = Vec::with_capacity(files.len());
    for file in files {
        if keep(file, ui).await {
            kept.push(file.clone());
        }
    }
    kept
}

async fn keep(file: &Utf8Path, ui: TestUi) -> bool {
    match tokio::fs::read_to_string(file).await {
        Ok(contents) => {
            let keep = declares_tests(&contents, ui);
            if !keep {
                debug!("pruned `{file}`: no {ui} declarations found");
            }
            keep
        }
        Err(error) => {
            warn!("pruned `{file}`: failed to read file: {error}");
            false
        }
    }
}
