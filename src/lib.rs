//! # Galley
//!
//! A convergent document layout engine.
//!
//! Content is a tree of flowables — paragraphs, headings, lists, tables,
//! figures, footnotes — queued into chains and drained into containers on
//! fixed-size pages. A flowable that hits the bottom of its container
//! suspends into a copyable state snapshot and resumes exactly where it
//! left off in the next one. Forward references (page numbers, tables of
//! contents) cannot be known until layout has run, so the whole document
//! is laid out repeatedly until its page count and reference tables stop
//! changing; the converged tables persist in a cache so the next
//! invocation usually needs a single pass.
//!
//! ## Architecture
//!
//! ```text
//! Flowables (frontend constructors)
//!       ↓
//!   [chain]      — queue of flowables over a rolling container sequence
//!       ↓
//!   [layout]     — container arena: cursors, overflow, lazy dimensions
//!       ↓
//!   [text]       — line breaking, hyphenation, tabs, justification
//!       ↓
//!   [document]   — prepare pass, convergence loop, reference cache
//!       ↓
//!   [backend]    — draw commands handed to an output collaborator
//! ```
//!
//! Overflow, page reflow, and an unconverged pass are ordinary values
//! flowing up the call stack; the only errors a caller sees are collected
//! warnings and the fatal conditions that abort a compile.

pub mod backend;
pub mod chain;
pub mod dimension;
pub mod document;
pub mod error;
pub mod flowable;
pub mod font;
pub mod layout;
pub mod page;
pub mod reference;
pub mod style;
pub mod text;

pub use backend::{Backend, DrawCommand, PageOutput, RecordingBackend};
pub use dimension::Dim;
pub use document::{Document, DocumentOptions, RenderCtx};
pub use error::{Diagnostics, Fatal, Warning};
pub use flowable::{FlowOutcome, FlowState, Flowable, FlowableKind, Span};
pub use font::{FixedAdvanceFont, FontService, FontSpec, ShapedFontService};
pub use page::{Margins, PageOptions, PageSize};
pub use reference::{NumberFormat, RefKind, ReferenceCache};
pub use style::{LineSpacing, Style, StyleDecl, StyleSheet, TabStop, TextAlign};

/// Prepare, lay out until convergence, and emit to a backend. The
/// one-call entry point; the `Document` methods expose the phases
/// individually.
pub fn render(document: &mut Document, backend: &mut dyn Backend) -> Result<usize, Fatal> {
    document.prepare();
    let page_count = document.run_layout()?;
    document.render_to(backend)?;
    Ok(page_count)
}
