//! Error taxonomy for the layout engine.
//!
//! Three channels, kept strictly apart:
//!
//! - **Control signals** (container overflow, page reflow, an unconverged
//!   pass) are ordinary enum values returned up the call stack. They are
//!   expected outcomes of layout and never implement `Error`.
//! - **Warnings** are recoverable conditions. They are collected in a
//!   [`Diagnostics`] sink with the originating element and page, echoed
//!   through `log::warn!`, and rendering continues with a placeholder.
//! - **Fatal** errors abort the compile and are the only `Error` values a
//!   caller ever sees.

use thiserror::Error;

/// Conditions that abort the compile.
#[derive(Debug, Error)]
pub enum Fatal {
    /// A style attribute had no value anywhere in the cascade: not on the
    /// element, not in its named style chain, not inherited, and the
    /// stylesheet carries no default for it.
    #[error("style attribute '{attribute}' has no value anywhere in the cascade for '{element}'")]
    UnresolvedStyle { attribute: String, element: String },

    /// A single-byte fallback encoding ran out of code points.
    #[error("single-byte encoding exhausted: {required} distinct glyphs, 255 available")]
    EncodingExhausted { required: usize },

    /// The layout loop hit its iteration cap without page count and
    /// reference tables stabilizing.
    #[error("layout did not converge after {passes} passes")]
    NonConvergence { passes: usize },

    /// The persisted reference cache could not be read or written.
    #[error("reference cache i/o failed")]
    CacheIo(#[from] std::io::Error),

    /// The persisted reference cache held unreadable data.
    #[error("reference cache is malformed")]
    CacheFormat(#[from] serde_json::Error),
}

/// A recoverable condition reported during layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub message: String,
    /// Identifier of the element that triggered the warning, when known.
    pub source: Option<String>,
    /// 1-based page number being rendered, when layout had reached a page.
    pub page: Option<usize>,
}

/// Collects warnings for the caller; never aborts rendering.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, message: impl Into<String>, source: Option<&str>, page: Option<usize>) {
        let warning = Warning {
            message: message.into(),
            source: source.map(str::to_string),
            page,
        };
        log::warn!(
            "{}{}{}",
            warning.message,
            warning
                .source
                .as_deref()
                .map(|s| format!(" (element '{s}')"))
                .unwrap_or_default(),
            warning
                .page
                .map(|p| format!(" (page {p})"))
                .unwrap_or_default(),
        );
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Drop warnings recorded after `len` entries. Used when a page render
    /// is rolled back and retried.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.warnings.truncate(len);
    }

    pub(crate) fn len(&self) -> usize {
        self.warnings.len()
    }
}
