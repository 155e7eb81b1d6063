//! # Output Backend Interface
//!
//! Rendering accumulates [`DrawCommand`]s in container-local coordinates;
//! placing a container composites them into its parent, and a finished
//! page becomes a [`PageOutput`]. A [`Backend`] consumes pages and turns
//! them into whatever artifact it likes — the engine never inspects the
//! output bytes.
//!
//! [`RecordingBackend`] keeps the pages as data. Tests assert against it,
//! and it optionally models a legacy single-byte glyph encoding so the
//! 255-symbol exhaustion path is a real, reachable condition.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Fatal;
use crate::font::FontSpec;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

/// A glyph positioned within a run, x relative to the run origin.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedGlyph {
    pub glyph: crate::font::Glyph,
    pub x: f64,
}

/// One drawing operation in page (or container-local) coordinates.
/// Y grows downward; glyph runs anchor at their baseline.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    GlyphRun {
        x: f64,
        y: f64,
        font: FontSpec,
        glyphs: Vec<PlacedGlyph>,
    },
    Rule {
        x: f64,
        y: f64,
        width: f64,
        thickness: f64,
    },
    /// An image box; `source` names the asset, the backend loads it.
    Image {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        source: String,
    },
}

impl DrawCommand {
    pub(crate) fn translate(&mut self, dx: f64, dy: f64) {
        match self {
            DrawCommand::GlyphRun { x, y, .. }
            | DrawCommand::Rule { x, y, .. }
            | DrawCommand::Image { x, y, .. } => {
                *x += dx;
                *y += dy;
            }
        }
    }
}

/// A fully composited page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageOutput {
    /// 1-based page number.
    pub number: usize,
    pub width: f64,
    pub height: f64,
    pub orientation: Orientation,
    pub commands: Vec<DrawCommand>,
}

impl PageOutput {
    /// All characters placed on the page, in command order. Test helper —
    /// the split/resume law compares these across layouts.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for cmd in &self.commands {
            if let DrawCommand::GlyphRun { glyphs, .. } = cmd {
                for g in glyphs {
                    out.push(g.glyph.ch);
                }
            }
        }
        out
    }
}

/// The output collaborator. Pages arrive in order after layout converges.
pub trait Backend {
    fn render_page(&mut self, page: &PageOutput) -> Result<(), Fatal>;
    fn finish(&mut self) -> Result<(), Fatal>;
}

/// Assigns single-byte codes to glyph ids, the way legacy simple-font
/// encodings do. Code 0 is reserved for .notdef, so 255 slots exist.
#[derive(Debug, Default)]
pub struct ByteEncoding {
    codes: HashMap<u16, u8>,
}

impl ByteEncoding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, glyph_id: u16) -> Result<u8, Fatal> {
        if let Some(&code) = self.codes.get(&glyph_id) {
            return Ok(code);
        }
        let next = self.codes.len() + 1;
        if next > 255 {
            return Err(Fatal::EncodingExhausted { required: next });
        }
        let code = next as u8;
        self.codes.insert(glyph_id, code);
        Ok(code)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Collects pages as data instead of serializing them.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    pub pages: Vec<PageOutput>,
    /// When set, glyph runs are forced through a per-family single-byte
    /// encoding, so documents needing more than 255 distinct glyphs in one
    /// family abort the compile.
    single_byte: bool,
    encodings: HashMap<String, ByteEncoding>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_single_byte_encoding() -> Self {
        RecordingBackend { single_byte: true, ..Default::default() }
    }
}

impl Backend for RecordingBackend {
    fn render_page(&mut self, page: &PageOutput) -> Result<(), Fatal> {
        if self.single_byte {
            for cmd in &page.commands {
                if let DrawCommand::GlyphRun { font, glyphs, .. } = cmd {
                    let enc = self.encodings.entry(font.family.clone()).or_default();
                    for g in glyphs {
                        enc.encode(g.glyph.id)?;
                    }
                }
            }
        }
        self.pages.push(page.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Fatal> {
        log::debug!("backend finished with {} pages", self.pages.len());
        Ok(())
    }
}
