//! # Paragraph and Line Engine
//!
//! Builds one line at a time from styled runs: words are shaped through
//! the font service (kerning and ligatures per adjacent glyph pair, small
//! caps per style), appended while they fit, hyphenated longest-prefix
//! first when they don't, and never silently dropped — a word that cannot
//! fit even on an empty line is placed anyway with a warning.
//!
//! A completed line is typeset: the vertical advance comes from the
//! paragraph's line-spacing policy combined with the previous line's
//! descender, and the horizontal slack is redistributed into inter-word
//! spaces for justified text (never on the final line) or shifts the whole
//! line for centered/right alignment.
//!
//! Tabs consume width up to the next applicable stop. Center stops give
//! back half of each following segment's width, right stops the full
//! width, clamped at zero; a tab with no stop behaves as a single space
//! and warns.

pub mod words;

use std::collections::{HashMap, HashSet};

use crate::backend::{DrawCommand, PlacedGlyph};
use crate::document::RenderCtx;
use crate::error::Fatal;
use crate::font::{FontSpec, Glyph};
use crate::layout::{ContainerArena, ContainerId, Overflow, EPSILON};
use crate::style::{LineSpacing, TabAlign, TabStop, TextAlign};
use words::{InlineRun, Token, Word, WordCursor, WordSource};

/// Everything a paragraph render needs, resolved from the cascade by the
/// caller.
#[derive(Debug, Clone)]
pub struct ParagraphSpec {
    pub runs: Vec<InlineRun>,
    /// Metrics source for empty lines and space widths.
    pub base_font: FontSpec,
    pub align: TextAlign,
    pub line_spacing: LineSpacing,
    pub indent_first: f64,
    pub tab_stops: Vec<TabStop>,
    pub hyphenate: bool,
    pub lang: String,
    /// Element identifier, for warnings.
    pub element: String,
}

/// Resumable paragraph position: the word cursor, a hyphenation remainder
/// waiting to be retried, and how many lines have been typeset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParagraphState {
    pub cursor: WordCursor,
    pub pending: Option<Word>,
    pub lines_done: usize,
}

#[derive(Debug)]
pub enum ParagraphOutcome {
    Complete { descender: f64 },
    Overflow(ParagraphState),
}

/// Called when a committed line carried footnote markers; places the note
/// bodies before the next line is built, so the body region shrinks in
/// time to affect it.
pub type NoteHook<'h> =
    &'h mut dyn FnMut(&mut RenderCtx<'_>, &mut ContainerArena, &str) -> Result<(), Fatal>;

/// How a line came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineEnd {
    /// Ran out of horizontal room.
    Filled,
    /// An explicit newline.
    Mandatory,
    /// The paragraph's content is exhausted.
    Final,
}

// ─── Line building ──────────────────────────────────────────────

enum LineItem {
    Word {
        glyphs: Vec<Glyph>,
        width: f64,
        font: FontSpec,
        note: Option<String>,
    },
    Space {
        width: f64,
    },
    Tab {
        width: f64,
        align: TabAlign,
        fill: Option<char>,
    },
}

/// Accumulates items for one line and runs the tab-stop arithmetic.
struct LineBuilder {
    avail: f64,
    items: Vec<LineItem>,
    /// Index of the open center/right tab absorbing following widths.
    active_tab: Option<usize>,
}

impl LineBuilder {
    fn new(avail: f64) -> Self {
        LineBuilder { avail, items: Vec::new(), active_tab: None }
    }

    /// Total width consumed so far, including open tab widths.
    fn cursor(&self) -> f64 {
        self.items
            .iter()
            .map(|item| match item {
                LineItem::Word { width, .. }
                | LineItem::Space { width }
                | LineItem::Tab { width, .. } => *width,
            })
            .sum()
    }

    fn has_words(&self) -> bool {
        self.items.iter().any(|i| matches!(i, LineItem::Word { .. }))
    }

    fn has_content(&self) -> bool {
        self.items
            .iter()
            .any(|i| !matches!(i, LineItem::Space { .. }))
    }

    /// How much of `width` the open tab would give back.
    fn absorbable(&self, width: f64) -> f64 {
        match self.active_tab {
            Some(i) => {
                if let LineItem::Tab { width: tab_width, align, .. } = &self.items[i] {
                    let share = match align {
                        TabAlign::Center => width / 2.0,
                        TabAlign::Right => width,
                        TabAlign::Left => 0.0,
                    };
                    share.min(*tab_width)
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    fn fits(&self, width: f64) -> bool {
        self.cursor() - self.absorbable(width) + width <= self.avail + EPSILON
    }

    /// Shrink the open tab for an appended segment of `width`.
    fn absorb(&mut self, width: f64) {
        let take = self.absorbable(width);
        if take > 0.0 {
            if let Some(i) = self.active_tab {
                if let LineItem::Tab { width: tab_width, .. } = &mut self.items[i] {
                    *tab_width -= take;
                }
            }
        }
    }

    fn push_word(&mut self, glyphs: Vec<Glyph>, width: f64, font: FontSpec, note: Option<String>) {
        self.absorb(width);
        self.items.push(LineItem::Word { glyphs, width, font, note });
    }

    fn push_space(&mut self, width: f64) {
        self.absorb(width);
        self.items.push(LineItem::Space { width });
    }

    /// Open a tab to the next stop past the cursor. `false` when no stop
    /// applies (the caller falls back to a space and warns).
    fn push_tab(&mut self, stops: &[TabStop]) -> bool {
        let cursor = self.cursor();
        let stop = stops.iter().find(|s| s.position > cursor + EPSILON);
        match stop {
            None => false,
            Some(stop) => {
                let width = stop.position - cursor;
                self.active_tab = matches!(stop.align, TabAlign::Center | TabAlign::Right)
                    .then_some(self.items.len());
                self.items.push(LineItem::Tab {
                    width,
                    align: stop.align,
                    fill: stop.fill,
                });
                true
            }
        }
    }

    /// Trailing spaces carry no width at the end of a line.
    fn trim_trailing_spaces(&mut self) {
        while matches!(self.items.last(), Some(LineItem::Space { .. })) {
            self.items.pop();
        }
    }
}

// ─── Vertical spacing ───────────────────────────────────────────

/// Baseline advance for a line, given its tallest ascender, the previous
/// line's (negative) descender, and the largest font size on the line.
fn line_advance(
    spacing: LineSpacing,
    ascent: f64,
    prev_descender: f64,
    max_font_size: f64,
) -> f64 {
    match spacing {
        LineSpacing::FontDefault => ascent - prev_descender,
        LineSpacing::Proportional(factor) => factor * max_font_size,
        LineSpacing::FixedPitch { pitch, minimum } => {
            let natural = ascent - prev_descender;
            let steps = (natural / pitch).ceil().max(1.0);
            (steps * pitch).max(minimum)
        }
        LineSpacing::Leading(leading) => leading,
    }
}

// ─── Word shaping ───────────────────────────────────────────────

/// Convert a word to glyphs: per-pair ligature substitution, then kerning
/// folded into the left glyph's advance. Characters without coverage get a
/// placeholder advance and are reported once per paragraph.
fn shape_word(
    ctx: &mut RenderCtx<'_>,
    text: &str,
    font: &FontSpec,
    element: &str,
    missing: &mut HashSet<char>,
) -> (Vec<Glyph>, f64) {
    let mut glyphs: Vec<Glyph> = Vec::new();
    for ch in text.chars() {
        let glyph = match ctx.fonts.glyph(ch, font) {
            Some(g) => g,
            None => {
                if missing.insert(ch) {
                    ctx.diags.warn(
                        format!("no glyph for '{ch}' in '{}'", font.family),
                        Some(element),
                        Some(ctx.page_number),
                    );
                }
                Glyph { id: 0, ch, advance: font.size * 0.5 }
            }
        };
        if let Some(prev) = glyphs.last().copied() {
            if let Some(ligature) = ctx.fonts.ligature(font, &prev, &glyph) {
                *glyphs.last_mut().unwrap() = ligature;
                continue;
            }
            let kern = ctx.fonts.kern(font, &prev, &glyph);
            if kern != 0.0 {
                glyphs.last_mut().unwrap().advance += kern;
            }
        }
        glyphs.push(glyph);
    }
    let width = glyphs.iter().map(|g| g.advance).sum();
    (glyphs, width)
}

// ─── Paragraph rendering ────────────────────────────────────────

/// Render a paragraph into `container`, resuming from `state` if given.
///
/// Overflow hands back the state as of the start of the line that did not
/// fit; resuming reproduces exactly the remainder an unbounded container
/// would have received.
pub fn render_paragraph(
    ctx: &mut RenderCtx<'_>,
    arena: &mut ContainerArena,
    container: ContainerId,
    spec: &ParagraphSpec,
    state: Option<ParagraphState>,
    last_descender: f64,
    notes: NoteHook<'_>,
) -> Result<ParagraphOutcome, Fatal> {
    let source = WordSource::new(&spec.runs);
    let mut state = state.unwrap_or_default();
    let mut prev_descender = last_descender;
    let mut missing = HashSet::new();
    // A word repeated in the same run shapes identically; cache it.
    let mut shaped: HashMap<(usize, String), (Vec<Glyph>, f64)> = HashMap::new();

    loop {
        let line_start = state.clone();
        let indent = if state.lines_done == 0 { spec.indent_first } else { 0.0 };
        let avail = (arena.width(container) - indent).max(0.0);
        let mut builder = LineBuilder::new(avail);
        let mut ended = LineEnd::Final;

        loop {
            let (token, next_cursor, from_pending) = match state.pending.clone() {
                Some(word) => (Token::Word(word), state.cursor, true),
                None => match source.next(state.cursor) {
                    None => {
                        ended = LineEnd::Final;
                        break;
                    }
                    Some((token, next)) => (token, next, false),
                },
            };

            match token {
                Token::Newline => {
                    state.cursor = next_cursor;
                    ended = LineEnd::Mandatory;
                    break;
                }
                Token::Space { run } => {
                    state.cursor = next_cursor;
                    if builder.has_content() {
                        builder.push_space(space_width(ctx, &spec.runs[run].font));
                    }
                }
                Token::Tab { run } => {
                    state.cursor = next_cursor;
                    if !builder.push_tab(&spec.tab_stops) {
                        ctx.diags.warn(
                            "tab without a defined stop, treating as space",
                            Some(spec.element.as_str()),
                            Some(ctx.page_number),
                        );
                        builder.push_space(space_width(ctx, &spec.runs[run].font));
                    }
                }
                Token::Word(word) => {
                    let font = &spec.runs[word.run].font;
                    let key = (word.run, word.text.clone());
                    let (glyphs, width) = match shaped.get(&key) {
                        Some(hit) => hit.clone(),
                        None => {
                            let result =
                                shape_word(ctx, &word.text, font, &spec.element, &mut missing);
                            shaped.insert(key, result.clone());
                            result
                        }
                    };
                    if builder.fits(width) {
                        let note = spec.runs[word.run].note.clone();
                        builder.push_word(glyphs, width, font.clone(), note);
                        if from_pending {
                            state.pending = None;
                        } else {
                            state.cursor = next_cursor;
                        }
                        continue;
                    }

                    // Longest hyphenation prefix that fits, hyphen included.
                    if spec.hyphenate {
                        let offsets = ctx.fonts.hyphenate(&word.text, &spec.lang);
                        let chars: Vec<char> = word.text.chars().collect();
                        let mut split = None;
                        for &k in offsets.iter().rev() {
                            if k == 0 || k >= chars.len() {
                                continue;
                            }
                            let prefix: String =
                                chars[..k].iter().collect::<String>() + "-";
                            let (prefix_glyphs, prefix_width) =
                                shape_word(ctx, &prefix, font, &spec.element, &mut missing);
                            if builder.fits(prefix_width) {
                                split = Some((k, prefix_glyphs, prefix_width));
                                break;
                            }
                        }
                        if let Some((k, prefix_glyphs, prefix_width)) = split {
                            let note = spec.runs[word.run].note.clone();
                            builder.push_word(prefix_glyphs, prefix_width, font.clone(), note);
                            let remainder: String = chars[k..].iter().collect();
                            state.pending = Some(Word { text: remainder, run: word.run });
                            if !from_pending {
                                state.cursor = next_cursor;
                            }
                            ended = LineEnd::Filled;
                            break;
                        }
                    }

                    if !builder.has_words() {
                        // Nothing else on the line and no candidate fits:
                        // place it anyway rather than dropping content.
                        ctx.diags.warn(
                            format!("'{}' does not fit even on an empty line", word.text),
                            Some(spec.element.as_str()),
                            Some(ctx.page_number),
                        );
                        let note = spec.runs[word.run].note.clone();
                        builder.push_word(glyphs, width, font.clone(), note);
                        if from_pending {
                            state.pending = None;
                        } else {
                            state.cursor = next_cursor;
                        }
                        continue;
                    }

                    // Leave the word unconsumed; the next line retries it.
                    ended = LineEnd::Filled;
                    break;
                }
            }
        }

        if ended == LineEnd::Final && !builder.has_content() {
            // Content exhausted with nothing buffered: the paragraph ended
            // at the previous line.
            return Ok(ParagraphOutcome::Complete { descender: prev_descender });
        }

        let mut line_notes = Vec::new();
        match typeset_line(
            ctx,
            arena,
            container,
            builder,
            spec,
            ended,
            prev_descender,
            indent,
            &mut line_notes,
        ) {
            Ok(descender) => {
                prev_descender = descender;
                state.lines_done += 1;
                for note in line_notes {
                    notes(ctx, arena, &note)?;
                }
            }
            Err(Overflow) => return Ok(ParagraphOutcome::Overflow(line_start)),
        }

        if ended == LineEnd::Final {
            return Ok(ParagraphOutcome::Complete { descender: prev_descender });
        }
    }
}

fn space_width(ctx: &RenderCtx<'_>, font: &FontSpec) -> f64 {
    ctx.fonts
        .glyph(' ', font)
        .map(|g| g.advance)
        .unwrap_or(font.size * 0.25)
}

/// Commit one line: check vertical room, advance the cursor, distribute
/// horizontal slack, and emit glyph runs at the baseline.
#[allow(clippy::too_many_arguments)]
fn typeset_line(
    ctx: &mut RenderCtx<'_>,
    arena: &mut ContainerArena,
    container: ContainerId,
    mut builder: LineBuilder,
    spec: &ParagraphSpec,
    ended: LineEnd,
    prev_descender: f64,
    indent: f64,
    line_notes: &mut Vec<String>,
) -> Result<f64, Overflow> {
    builder.trim_trailing_spaces();

    // Vertical metrics: tallest word wins; empty lines use the base font.
    let mut ascent: f64 = 0.0;
    let mut descent: f64 = 0.0;
    let mut max_size: f64 = 0.0;
    let mut any_word = false;
    for item in &builder.items {
        if let LineItem::Word { font, .. } = item {
            let m = ctx.fonts.metrics(font);
            ascent = ascent.max(m.ascender);
            descent = descent.min(m.descender);
            max_size = max_size.max(font.size);
            any_word = true;
        }
    }
    if !any_word {
        let m = ctx.fonts.metrics(&spec.base_font);
        ascent = m.ascender;
        descent = m.descender;
        max_size = spec.base_font.size;
    }

    let advance = line_advance(spec.line_spacing, ascent, prev_descender, max_size);
    // The line needs room for its baseline advance plus the descender
    // hanging below it, even though only the advance is consumed.
    if !arena.can_advance(container, advance - descent) {
        return Err(Overflow);
    }
    arena.advance(container, advance)?;
    let baseline = arena.cursor(container);

    // Horizontal placement.
    let natural = builder.cursor();
    let slack = (builder.avail - natural).max(0.0);
    let mut x = indent;
    match spec.align {
        TextAlign::Left => {}
        TextAlign::Center => x += slack / 2.0,
        TextAlign::Right => x += slack,
        TextAlign::Justify => {
            let stretchable = ended == LineEnd::Filled;
            let space_count = builder
                .items
                .iter()
                .filter(|i| matches!(i, LineItem::Space { .. }))
                .count();
            if stretchable && space_count > 0 {
                let extra = slack / space_count as f64;
                for item in &mut builder.items {
                    if let LineItem::Space { width } = item {
                        *width += extra;
                    }
                }
            }
        }
    }

    for item in &builder.items {
        match item {
            LineItem::Word { glyphs, width, font, note } => {
                if let Some(note) = note {
                    line_notes.push(note.clone());
                }
                let mut placed = Vec::with_capacity(glyphs.len());
                let mut gx = 0.0;
                for glyph in glyphs {
                    placed.push(PlacedGlyph { glyph: *glyph, x: gx });
                    gx += glyph.advance;
                }
                arena.draw(
                    container,
                    DrawCommand::GlyphRun {
                        x,
                        y: baseline,
                        font: font.clone(),
                        glyphs: placed,
                    },
                );
                x += width;
            }
            LineItem::Space { width } => x += width,
            LineItem::Tab { width, fill, .. } => {
                if let Some(fill) = fill {
                    if let Some(glyph) = ctx.fonts.glyph(*fill, &spec.base_font) {
                        let count = (width / glyph.advance).floor() as usize;
                        if count > 0 {
                            // Leaders sit flush against the following text.
                            let start = x + width - count as f64 * glyph.advance;
                            let placed = (0..count)
                                .map(|i| PlacedGlyph {
                                    glyph,
                                    x: i as f64 * glyph.advance,
                                })
                                .collect();
                            arena.draw(
                                container,
                                DrawCommand::GlyphRun {
                                    x: start,
                                    y: baseline,
                                    font: spec.base_font.clone(),
                                    glyphs: placed,
                                },
                            );
                        }
                    }
                }
                x += width;
            }
        }
    }

    Ok(descent)
}
