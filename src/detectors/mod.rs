// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-file pattern detectors

pub mod contracts;
pub mod idempotency;
pub mod payload;
pub mod webhook;

use rayon::prelude::*;

use crate::scanner::SourceFile;
pub use webhook::{classify, is_webhook_handler, HandlerMatch};

/// A file the classifier accepted as a webhook handler
#[derive(Debug, Clone, Copy)]
pub struct ClassifiedHandler<'a> {
    pub file: &'a SourceFile,
    pub matched: HandlerMatch,
}

/// Classify every file, keeping input order
pub fn webhook_handlers<'a>(files: &[&'a SourceFile]) -> Vec<ClassifiedHandler<'a>> {
    files
        .par_iter()
        .filter_map(|file| {
            classify(&file.relative, &file.text).map(|matched| ClassifiedHandler {
                file: *file,
                matched,
            })
        })
        .collect()
}
