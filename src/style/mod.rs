//! # Style System
//!
//! A named-style model for document elements. Every flowable carries a
//! `StyleDecl`: an optional named style plus inline overrides. Named styles
//! live in a [`StyleSheet`] and inherit from a base style by name.
//!
//! Attribute lookup walks the cascade explicitly: inline value → named
//! style chain → parent element (for inherited attributes) → stylesheet
//! default. Each probe returns a tri-state [`Lookup`] — there is no
//! sentinel value and no error-as-control-flow. An attribute with no value
//! anywhere is the fatal [`Fatal::UnresolvedStyle`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Fatal;

/// Slant of a typeface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FontSlant {
    #[default]
    Normal,
    Italic,
    Oblique,
}

/// Horizontal placement of typeset lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextAlign {
    #[default]
    Left,
    Right,
    Center,
    Justify,
}

/// How a paragraph spaces its baselines.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LineSpacing {
    /// Ascender of this line plus the descender hanging from the previous
    /// line, straight from the font metrics.
    FontDefault,
    /// A multiple of the line's largest font size.
    Proportional(f64),
    /// Baselines snap to a grid of `pitch` points, never closer than
    /// `minimum`.
    FixedPitch { pitch: f64, minimum: f64 },
    /// An explicit baseline-to-baseline distance.
    Leading(f64),
}

/// Anchoring of a tab stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TabAlign {
    Left,
    Center,
    Right,
}

/// A single tab stop on a line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabStop {
    /// Offset from the line's left edge, in points.
    pub position: f64,
    pub align: TabAlign,
    /// Optional fill character tiled across the tab's width (e.g. '.' for
    /// a table-of-contents leader).
    pub fill: Option<char>,
}

impl TabStop {
    pub fn left(position: f64) -> Self {
        TabStop { position, align: TabAlign::Left, fill: None }
    }

    pub fn center(position: f64) -> Self {
        TabStop { position, align: TabAlign::Center, fill: None }
    }

    pub fn right(position: f64) -> Self {
        TabStop { position, align: TabAlign::Right, fill: None }
    }

    pub fn with_fill(mut self, fill: char) -> Self {
        self.fill = Some(fill);
        self
    }
}

/// The attribute set a style may define. All fields optional; absence means
/// the cascade keeps looking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Style {
    /// Name of the style this one extends, for stylesheet entries.
    pub base: Option<String>,

    // ── Typography (inherited) ─────────────────────────────────
    pub font_family: Option<String>,
    pub font_size: Option<f64>,
    pub font_weight: Option<u32>,
    pub font_slant: Option<FontSlant>,
    pub small_caps: Option<bool>,
    pub line_spacing: Option<LineSpacing>,
    pub text_align: Option<TextAlign>,
    pub tab_stops: Option<Vec<TabStop>>,
    pub hyphenate: Option<bool>,
    /// BCP 47 language tag used for hyphenation.
    pub language: Option<String>,

    // ── Block spacing (not inherited) ──────────────────────────
    pub space_above: Option<f64>,
    pub space_below: Option<f64>,
    /// First-line indent.
    pub indent_first: Option<f64>,
    /// Render this group of flowables together or not at all.
    pub keep_together: Option<bool>,
    /// Never leave this flowable alone at the bottom of a container; if
    /// its successor cannot start there, both move on together.
    pub keep_with_next: Option<bool>,
}

/// A flowable's style declaration: optional named style + inline overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleDecl {
    pub name: Option<String>,
    #[serde(flatten)]
    pub style: Style,
}

impl StyleDecl {
    pub fn named(name: &str) -> Self {
        StyleDecl { name: Some(name.to_string()), style: Style::default() }
    }

    pub fn inline(style: Style) -> Self {
        StyleDecl { name: None, style }
    }
}

/// Result of probing one element level for an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    DeferToParent,
    UseDefault,
}

/// One frame of the element ancestry, linked on the call stack.
#[derive(Clone, Copy)]
pub struct StyleChain<'a> {
    pub decl: &'a StyleDecl,
    pub parent: Option<&'a StyleChain<'a>>,
}

impl<'a> StyleChain<'a> {
    pub fn root(decl: &'a StyleDecl) -> Self {
        StyleChain { decl, parent: None }
    }

    pub fn push(&'a self, decl: &'a StyleDecl) -> StyleChain<'a> {
        StyleChain { decl, parent: Some(self) }
    }
}

/// Named styles plus the document-wide defaults.
#[derive(Debug, Clone, Default)]
pub struct StyleSheet {
    styles: HashMap<String, Style>,
    defaults: Style,
}

impl StyleSheet {
    /// An empty sheet with no defaults. Attributes left undefined anywhere
    /// resolve to [`Fatal::UnresolvedStyle`].
    pub fn empty() -> Self {
        Self::default()
    }

    /// A sheet whose defaults cover every attribute.
    pub fn with_defaults() -> Self {
        StyleSheet {
            styles: HashMap::new(),
            defaults: Style {
                base: None,
                font_family: Some("Helvetica".to_string()),
                font_size: Some(12.0),
                font_weight: Some(400),
                font_slant: Some(FontSlant::Normal),
                small_caps: Some(false),
                line_spacing: Some(LineSpacing::FontDefault),
                text_align: Some(TextAlign::Left),
                tab_stops: Some(Vec::new()),
                hyphenate: Some(true),
                language: Some("en".to_string()),
                space_above: Some(0.0),
                space_below: Some(0.0),
                indent_first: Some(0.0),
                keep_together: Some(false),
                keep_with_next: Some(false),
            },
        }
    }

    pub fn define(&mut self, name: &str, style: Style) {
        self.styles.insert(name.to_string(), style);
    }

    pub fn set_default(&mut self, style: Style) {
        self.defaults = style;
    }

    /// Probe one element level: inline overrides first, then the named
    /// style chain (following `base` links).
    fn probe<T>(
        &self,
        decl: &StyleDecl,
        inherited: bool,
        get: impl Fn(&Style) -> Option<T> + Copy,
    ) -> Lookup<T> {
        if let Some(v) = get(&decl.style) {
            return Lookup::Found(v);
        }
        let mut name = decl.name.as_deref();
        let mut hops = 0;
        while let Some(n) = name {
            // A cycle in base links would loop forever; bail after a sane depth.
            hops += 1;
            if hops > 32 {
                log::warn!("style base chain exceeds 32 links at '{n}', stopping");
                break;
            }
            match self.styles.get(n) {
                Some(style) => {
                    if let Some(v) = get(style) {
                        return Lookup::Found(v);
                    }
                    name = style.base.as_deref();
                }
                None => break,
            }
        }
        if inherited {
            Lookup::DeferToParent
        } else {
            Lookup::UseDefault
        }
    }

    /// Resolve an attribute through the full cascade.
    pub fn attr<T>(
        &self,
        attribute: &str,
        element: &str,
        chain: &StyleChain<'_>,
        inherited: bool,
        get: impl Fn(&Style) -> Option<T> + Copy,
    ) -> Result<T, Fatal> {
        let mut current = Some(chain);
        while let Some(node) = current {
            match self.probe(node.decl, inherited, get) {
                Lookup::Found(v) => return Ok(v),
                Lookup::DeferToParent => current = node.parent,
                Lookup::UseDefault => break,
            }
        }
        get(&self.defaults).ok_or_else(|| Fatal::UnresolvedStyle {
            attribute: attribute.to_string(),
            element: element.to_string(),
        })
    }

    // Typed accessors for the attributes the engine reads.

    pub fn font_family(&self, el: &str, c: &StyleChain<'_>) -> Result<String, Fatal> {
        self.attr("font-family", el, c, true, |s| s.font_family.clone())
    }

    pub fn font_size(&self, el: &str, c: &StyleChain<'_>) -> Result<f64, Fatal> {
        self.attr("font-size", el, c, true, |s| s.font_size)
    }

    pub fn font_weight(&self, el: &str, c: &StyleChain<'_>) -> Result<u32, Fatal> {
        self.attr("font-weight", el, c, true, |s| s.font_weight)
    }

    pub fn font_slant(&self, el: &str, c: &StyleChain<'_>) -> Result<FontSlant, Fatal> {
        self.attr("font-slant", el, c, true, |s| s.font_slant)
    }

    pub fn small_caps(&self, el: &str, c: &StyleChain<'_>) -> Result<bool, Fatal> {
        self.attr("small-caps", el, c, true, |s| s.small_caps)
    }

    pub fn line_spacing(&self, el: &str, c: &StyleChain<'_>) -> Result<LineSpacing, Fatal> {
        self.attr("line-spacing", el, c, true, |s| s.line_spacing)
    }

    pub fn text_align(&self, el: &str, c: &StyleChain<'_>) -> Result<TextAlign, Fatal> {
        self.attr("text-align", el, c, true, |s| s.text_align)
    }

    pub fn tab_stops(&self, el: &str, c: &StyleChain<'_>) -> Result<Vec<TabStop>, Fatal> {
        self.attr("tab-stops", el, c, true, |s| s.tab_stops.clone())
    }

    pub fn hyphenate(&self, el: &str, c: &StyleChain<'_>) -> Result<bool, Fatal> {
        self.attr("hyphenate", el, c, true, |s| s.hyphenate)
    }

    pub fn language(&self, el: &str, c: &StyleChain<'_>) -> Result<String, Fatal> {
        self.attr("language", el, c, true, |s| s.language.clone())
    }

    pub fn space_above(&self, el: &str, c: &StyleChain<'_>) -> Result<f64, Fatal> {
        self.attr("space-above", el, c, false, |s| s.space_above)
    }

    pub fn space_below(&self, el: &str, c: &StyleChain<'_>) -> Result<f64, Fatal> {
        self.attr("space-below", el, c, false, |s| s.space_below)
    }

    pub fn indent_first(&self, el: &str, c: &StyleChain<'_>) -> Result<f64, Fatal> {
        self.attr("indent-first", el, c, false, |s| s.indent_first)
    }

    pub fn keep_together(&self, el: &str, c: &StyleChain<'_>) -> Result<bool, Fatal> {
        self.attr("keep-together", el, c, false, |s| s.keep_together)
    }

    pub fn keep_with_next(&self, el: &str, c: &StyleChain<'_>) -> Result<bool, Fatal> {
        self.attr("keep-with-next", el, c, false, |s| s.keep_with_next)
    }
}
