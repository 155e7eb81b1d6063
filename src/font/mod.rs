//! # Font Services
//!
//! The engine never parses font files in the layout path; it asks a
//! [`FontService`] for glyphs, metrics, kerning, ligatures, and
//! hyphenation candidates. Two implementations ship with the crate:
//!
//! - [`ShapedFontService`] — registered TrueType/OpenType faces, metrics
//!   from `ttf-parser`, pair kerning and ligature substitution recovered
//!   through `rustybuzz` shaping, hyphenation from `hypher`.
//! - [`FixedAdvanceFont`] — a metric-only face where every glyph advances
//!   half the font size. Deterministic widths for measurement and tests.
//!
//! Glyph and pair caches are explicit objects owned by the service
//! instance, not process-wide state.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::style::FontSlant;

/// Which variant of a face to select glyphs from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FontVariant {
    #[default]
    Normal,
    /// Lowercase letters map to scaled uppercase forms when the face has
    /// no dedicated small-caps glyphs.
    SmallCaps,
}

/// Everything needed to pick a face and scale its glyphs.
#[derive(Debug, Clone, PartialEq)]
pub struct FontSpec {
    pub family: String,
    pub weight: u32,
    pub slant: FontSlant,
    pub size: f64,
    pub variant: FontVariant,
}

impl FontSpec {
    pub fn new(family: &str, size: f64) -> Self {
        FontSpec {
            family: family.to_string(),
            weight: 400,
            slant: FontSlant::Normal,
            size,
            variant: FontVariant::Normal,
        }
    }
}

/// A selected glyph with its advance at the spec's size, in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glyph {
    pub id: u16,
    /// The character this glyph was selected for. Backends use it for
    /// text extraction; pair queries use it to re-shape.
    pub ch: char,
    pub advance: f64,
}

/// Vertical metrics at a given size, in points. `descender` is negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontMetrics {
    pub ascender: f64,
    pub descender: f64,
    pub line_gap: f64,
}

impl FontMetrics {
    /// Baseline-to-baseline distance the font itself suggests.
    pub fn line_height(&self) -> f64 {
        self.ascender - self.descender + self.line_gap
    }
}

/// The text-shaping collaborator consumed by the paragraph engine.
pub trait FontService {
    /// Vertical metrics for the face the spec selects.
    fn metrics(&self, spec: &FontSpec) -> FontMetrics;

    /// Glyph and advance for one character, or `None` when the face has no
    /// coverage (the engine substitutes a placeholder and warns).
    fn glyph(&self, ch: char, spec: &FontSpec) -> Option<Glyph>;

    /// Kerning adjustment for an adjacent glyph pair, in points. Zero when
    /// the face defines none.
    fn kern(&self, spec: &FontSpec, left: &Glyph, right: &Glyph) -> f64;

    /// Ligature replacing an adjacent glyph pair, if the face defines one.
    fn ligature(&self, spec: &FontSpec, left: &Glyph, right: &Glyph) -> Option<Glyph>;

    /// Candidate hyphenation break offsets (char indices into `word`),
    /// ascending, interior only. Empty when the language is unsupported.
    fn hyphenate(&self, word: &str, lang: &str) -> Vec<usize>;
}

/// Map a BCP 47 tag to a `hypher` pattern set. The subset of languages the
/// engine ships patterns for; unknown tags disable hyphenation.
pub fn hyphenation_lang(tag: &str) -> Option<hypher::Lang> {
    let primary = tag.split('-').next().unwrap_or(tag).to_lowercase();
    match primary.as_str() {
        "en" => Some(hypher::Lang::English),
        "de" => Some(hypher::Lang::German),
        "fr" => Some(hypher::Lang::French),
        "es" => Some(hypher::Lang::Spanish),
        "it" => Some(hypher::Lang::Italian),
        "nl" => Some(hypher::Lang::Dutch),
        "pt" => Some(hypher::Lang::Portuguese),
        "sv" => Some(hypher::Lang::Swedish),
        "da" => Some(hypher::Lang::Danish),
        "no" | "nb" | "nn" => Some(hypher::Lang::Norwegian),
        "fi" => Some(hypher::Lang::Finnish),
        "ru" => Some(hypher::Lang::Russian),
        "cs" => Some(hypher::Lang::Czech),
        "pl" => Some(hypher::Lang::Polish),
        "tr" => Some(hypher::Lang::Turkish),
        _ => None,
    }
}

/// Hyphenation offsets via `hypher`, shared by both services.
fn hypher_offsets(word: &str, lang: &str) -> Vec<usize> {
    let Some(lang) = hyphenation_lang(lang) else {
        return Vec::new();
    };
    let total = word.chars().count();
    let mut offsets = Vec::new();
    let mut consumed = 0;
    for syllable in hypher::hyphenate(word, lang) {
        consumed += syllable.chars().count();
        if consumed > 0 && consumed < total {
            offsets.push(consumed);
        }
    }
    offsets
}

// ─── Shaped fonts ───────────────────────────────────────────────

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct FaceKey {
    family: String,
    bold: bool,
    italic: bool,
}

impl FaceKey {
    fn from_spec(spec: &FontSpec) -> Self {
        FaceKey {
            family: spec.family.clone(),
            bold: spec.weight >= 600,
            italic: !matches!(spec.slant, FontSlant::Normal),
        }
    }
}

/// Kerning/ligature answer for one character pair, in font units.
#[derive(Debug, Clone, Copy)]
struct PairShape {
    kern_units: f64,
    ligature: Option<(u16, f64)>,
}

struct FaceEntry {
    data: Vec<u8>,
    units_per_em: f64,
    ascender: f64,
    descender: f64,
    line_gap: f64,
    glyph_ids: HashMap<char, u16>,
    advances: HashMap<char, u16>,
    pair_cache: RefCell<HashMap<(char, char), PairShape>>,
}

impl FaceEntry {
    fn parse(data: Vec<u8>) -> Option<Self> {
        let face = ttf_parser::Face::parse(&data, 0).ok()?;
        let units_per_em = face.units_per_em() as f64;
        let ascender = face.ascender() as f64;
        let descender = face.descender() as f64;
        let line_gap = face.line_gap() as f64;

        let mut glyph_ids = HashMap::new();
        let mut advances = HashMap::new();
        // Sample the BMP once so later lookups never re-parse the face.
        for code in 32u32..=0xFFFF {
            if let Some(ch) = char::from_u32(code) {
                if let Some(glyph_id) = face.glyph_index(ch) {
                    let advance = face.glyph_hor_advance(glyph_id).unwrap_or(0);
                    glyph_ids.insert(ch, glyph_id.0);
                    advances.insert(ch, advance);
                }
            }
        }

        Some(FaceEntry {
            data,
            units_per_em,
            ascender,
            descender,
            line_gap,
            glyph_ids,
            advances,
            pair_cache: RefCell::new(HashMap::new()),
        })
    }

    fn scale(&self, size: f64) -> f64 {
        size / self.units_per_em
    }

    /// Shape a two-character cluster and compare it to the isolated glyphs
    /// to recover the pair adjustment (GPOS kerning) or a substitution
    /// (GSUB ligature).
    fn pair_shape(&self, left: char, right: char) -> PairShape {
        if let Some(cached) = self.pair_cache.borrow().get(&(left, right)) {
            return *cached;
        }
        let mut result = PairShape { kern_units: 0.0, ligature: None };
        if let Some(face) = rustybuzz::Face::from_slice(&self.data, 0) {
            let mut buffer = rustybuzz::UnicodeBuffer::new();
            buffer.push_str(&format!("{left}{right}"));
            let output = rustybuzz::shape(&face, &[], buffer);
            let infos = output.glyph_infos();
            let positions = output.glyph_positions();
            if infos.len() == 1 {
                result.ligature = Some((
                    infos[0].glyph_id as u16,
                    positions[0].x_advance as f64,
                ));
            } else if infos.len() == 2 {
                let shaped: f64 = positions.iter().map(|p| p.x_advance as f64).sum();
                let isolated = (*self.advances.get(&left).unwrap_or(&0)
                    + *self.advances.get(&right).unwrap_or(&0)) as f64;
                result.kern_units = shaped - isolated;
            }
        }
        self.pair_cache.borrow_mut().insert((left, right), result);
        result
    }
}

/// A registry of embedded faces answering shaping queries.
///
/// Small-caps selection substitutes scaled uppercase glyphs when the face
/// has no dedicated variant; the advance is scaled with the glyph.
pub struct ShapedFontService {
    faces: HashMap<FaceKey, FaceEntry>,
    small_caps_scale: f64,
}

impl ShapedFontService {
    pub fn new() -> Self {
        ShapedFontService { faces: HashMap::new(), small_caps_scale: 0.8 }
    }

    /// Register a face for a family/weight/slant. Returns false when the
    /// data does not parse as a font.
    pub fn register(&mut self, family: &str, weight: u32, italic: bool, data: Vec<u8>) -> bool {
        match FaceEntry::parse(data) {
            Some(entry) => {
                log::debug!("registered face '{family}' weight={weight} italic={italic}");
                self.faces.insert(
                    FaceKey { family: family.to_string(), bold: weight >= 600, italic },
                    entry,
                );
                true
            }
            None => {
                log::warn!("font data for '{family}' did not parse, ignoring");
                false
            }
        }
    }

    fn face(&self, spec: &FontSpec) -> Option<&FaceEntry> {
        let key = FaceKey::from_spec(spec);
        if let Some(entry) = self.faces.get(&key) {
            return Some(entry);
        }
        // Fall back to the other weight/slant of the same family.
        self.faces
            .iter()
            .find(|(k, _)| k.family == key.family)
            .map(|(_, e)| e)
    }

    /// The character actually shaped for a spec, and the extra scale small
    /// caps apply on top of the font size.
    fn select(&self, ch: char, spec: &FontSpec) -> (char, f64) {
        if spec.variant == FontVariant::SmallCaps && ch.is_lowercase() {
            let upper = ch.to_uppercase().next().unwrap_or(ch);
            (upper, self.small_caps_scale)
        } else {
            (ch, 1.0)
        }
    }
}

impl Default for ShapedFontService {
    fn default() -> Self {
        Self::new()
    }
}

impl FontService for ShapedFontService {
    fn metrics(&self, spec: &FontSpec) -> FontMetrics {
        match self.face(spec) {
            Some(entry) => {
                let scale = entry.scale(spec.size);
                FontMetrics {
                    ascender: entry.ascender * scale,
                    descender: entry.descender * scale,
                    line_gap: entry.line_gap * scale,
                }
            }
            None => FontMetrics {
                ascender: 0.8 * spec.size,
                descender: -0.2 * spec.size,
                line_gap: 0.0,
            },
        }
    }

    fn glyph(&self, ch: char, spec: &FontSpec) -> Option<Glyph> {
        let entry = self.face(spec)?;
        let (selected, variant_scale) = self.select(ch, spec);
        let id = *entry.glyph_ids.get(&selected)?;
        let advance_units = *entry.advances.get(&selected)? as f64;
        Some(Glyph {
            id,
            ch: selected,
            advance: advance_units * entry.scale(spec.size) * variant_scale,
        })
    }

    fn kern(&self, spec: &FontSpec, left: &Glyph, right: &Glyph) -> f64 {
        match self.face(spec) {
            Some(entry) => {
                let pair = entry.pair_shape(left.ch, right.ch);
                pair.kern_units * entry.scale(spec.size)
            }
            None => 0.0,
        }
    }

    fn ligature(&self, spec: &FontSpec, left: &Glyph, right: &Glyph) -> Option<Glyph> {
        let entry = self.face(spec)?;
        let pair = entry.pair_shape(left.ch, right.ch);
        pair.ligature.map(|(id, advance_units)| Glyph {
            id,
            ch: left.ch,
            advance: advance_units * entry.scale(spec.size),
        })
    }

    fn hyphenate(&self, word: &str, lang: &str) -> Vec<usize> {
        hypher_offsets(word, lang)
    }
}

// ─── Fixed-advance metric font ──────────────────────────────────

/// A metric-only service: every glyph advances `size * 0.5`, small caps
/// `size * 0.4`. No kerning, no ligatures. Widths are exact fractions, so
/// layout tests can predict cursor positions.
pub struct FixedAdvanceFont;

impl FixedAdvanceFont {
    pub fn new() -> Self {
        FixedAdvanceFont
    }
}

impl Default for FixedAdvanceFont {
    fn default() -> Self {
        Self::new()
    }
}

impl FontService for FixedAdvanceFont {
    fn metrics(&self, spec: &FontSpec) -> FontMetrics {
        FontMetrics {
            ascender: 0.8 * spec.size,
            descender: -0.2 * spec.size,
            line_gap: 0.0,
        }
    }

    fn glyph(&self, ch: char, spec: &FontSpec) -> Option<Glyph> {
        let (selected, scale) = if spec.variant == FontVariant::SmallCaps && ch.is_lowercase() {
            (ch.to_uppercase().next().unwrap_or(ch), 0.8)
        } else {
            (ch, 1.0)
        };
        Some(Glyph {
            id: selected as u16,
            ch: selected,
            advance: 0.5 * spec.size * scale,
        })
    }

    fn kern(&self, _spec: &FontSpec, _left: &Glyph, _right: &Glyph) -> f64 {
        0.0
    }

    fn ligature(&self, _spec: &FontSpec, _left: &Glyph, _right: &Glyph) -> Option<Glyph> {
        None
    }

    fn hyphenate(&self, word: &str, lang: &str) -> Vec<usize> {
        hypher_offsets(word, lang)
    }
}
