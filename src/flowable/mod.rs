//! # Flowables
//!
//! The document tree. A [`Flowable`] is a unit of vertically-stacked
//! content: a kind, a style declaration, an optional referenceable id, and
//! child flowables. Kinds cover paragraphs, headings, lists, definition
//! lists, tables, figures, sections, rules, floats, keep-together groups,
//! page breaks, and tables of contents.
//!
//! ## The flow protocol
//!
//! `flow` adds the style's space-above (skipped when resuming), renders,
//! then adds space-below. Rendering either completes — returning the
//! descender its last line leaves hanging — or overflows with a
//! [`FlowState`]: a self-contained, copyable snapshot sufficient to resume
//! exactly the unconsumed remainder in the next container. Composite
//! flowables store their current child index plus that child's own state,
//! recursively. A first-time float placement surfaces as
//! [`FlowOutcome::Reflow`], which the owning page catches.

use serde::{Deserialize, Serialize};

use crate::document::RenderCtx;
use crate::error::Fatal;
use crate::font::{FontSpec, FontVariant};
use crate::layout::{ContainerArena, ContainerId, EPSILON};
use crate::reference::RefKind;
use crate::style::{StyleChain, StyleDecl, TabStop, TextAlign};
use crate::text::words::InlineRun;
use crate::text::{render_paragraph, ParagraphOutcome, ParagraphSpec, ParagraphState};

/// Inline content of a paragraph-like flowable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "span")]
pub enum Span {
    /// Plain styled text.
    Text {
        content: String,
        #[serde(default)]
        style: StyleDecl,
    },
    /// Text resolved from the reference store at render time: a target's
    /// formatted number, title, or page number.
    Reference {
        target: String,
        show: RefKind,
        #[serde(default)]
        style: StyleDecl,
    },
    /// A footnote marker. Numbered at first render encounter; the note
    /// body is placed when the line carrying the marker commits.
    NoteMark { note: String },
}

impl Span {
    pub fn text(content: &str) -> Self {
        Span::Text { content: content.to_string(), style: StyleDecl::default() }
    }

    pub fn styled(content: &str, style: StyleDecl) -> Self {
        Span::Text { content: content.to_string(), style }
    }

    pub fn page_ref(target: &str) -> Self {
        Span::Reference {
            target: target.to_string(),
            show: RefKind::Page,
            style: StyleDecl::default(),
        }
    }

    pub fn note_mark(note: &str) -> Self {
        Span::NoteMark { note: note.to_string() }
    }
}

/// The kinds of content the frontend can construct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlowableKind {
    Paragraph { spans: Vec<Span> },
    Heading { level: u8, spans: Vec<Span> },
    /// Children are the list items; each item's children are its content.
    List { ordered: bool },
    ListItem,
    /// Children are `Definition` flowables.
    DefinitionList,
    Definition { term: Vec<Span> },
    /// Children are `TableRow`s; the first `header_rows` repeat after a
    /// break. `columns` are width fractions of the table width.
    Table { columns: Vec<f64>, header_rows: usize },
    TableRow,
    TableCell { col_span: usize },
    /// An image box with a numbered caption. Atomic: moves as a whole.
    Figure { source: String, width: f64, height: f64, caption: Vec<Span> },
    Section,
    /// A horizontal rule across the container.
    Rule { thickness: f64 },
    /// Diverts its children to the page's float region, once per page.
    Float,
    /// A plain sequence; with `keep-together` style it becomes atomic.
    Group,
    /// Forces the rest of the chain into the next container.
    PageBreak,
    /// One entry per registered heading, with a dotted leader to the page
    /// number resolved from the previous pass.
    TableOfContents { levels: u8 },
}

/// A node of the document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flowable {
    pub kind: FlowableKind,
    #[serde(default)]
    pub style: StyleDecl,
    /// Document-wide identifier; assigned during prepare when absent on a
    /// referenceable kind.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub children: Vec<Flowable>,
}

impl Flowable {
    fn new(kind: FlowableKind) -> Self {
        Flowable { kind, style: StyleDecl::default(), id: None, children: Vec::new() }
    }

    pub fn paragraph(text: &str) -> Self {
        Flowable::new(FlowableKind::Paragraph { spans: vec![Span::text(text)] })
    }

    pub fn paragraph_spans(spans: Vec<Span>) -> Self {
        Flowable::new(FlowableKind::Paragraph { spans })
    }

    pub fn heading(level: u8, text: &str) -> Self {
        Flowable::new(FlowableKind::Heading { level, spans: vec![Span::text(text)] })
    }

    pub fn list(ordered: bool, items: Vec<Vec<Flowable>>) -> Self {
        let mut list = Flowable::new(FlowableKind::List { ordered });
        list.children = items
            .into_iter()
            .map(|content| {
                let mut item = Flowable::new(FlowableKind::ListItem);
                item.children = content;
                item
            })
            .collect();
        list
    }

    pub fn definition_list(pairs: Vec<(Vec<Span>, Vec<Flowable>)>) -> Self {
        let mut dl = Flowable::new(FlowableKind::DefinitionList);
        dl.children = pairs
            .into_iter()
            .map(|(term, body)| {
                let mut def = Flowable::new(FlowableKind::Definition { term });
                def.children = body;
                def
            })
            .collect();
        dl
    }

    pub fn table(columns: Vec<f64>, header_rows: usize, rows: Vec<Vec<Flowable>>) -> Self {
        let mut table = Flowable::new(FlowableKind::Table { columns, header_rows });
        table.children = rows
            .into_iter()
            .map(|cells| {
                let mut row = Flowable::new(FlowableKind::TableRow);
                row.children = cells
                    .into_iter()
                    .map(|content| {
                        let mut cell = Flowable::new(FlowableKind::TableCell { col_span: 1 });
                        cell.children = vec![content];
                        cell
                    })
                    .collect();
                row
            })
            .collect();
        table
    }

    pub fn figure(source: &str, width: f64, height: f64, caption: Vec<Span>) -> Self {
        Flowable::new(FlowableKind::Figure {
            source: source.to_string(),
            width,
            height,
            caption,
        })
    }

    pub fn section(children: Vec<Flowable>) -> Self {
        let mut section = Flowable::new(FlowableKind::Section);
        section.children = children;
        section
    }

    pub fn rule(thickness: f64) -> Self {
        Flowable::new(FlowableKind::Rule { thickness })
    }

    pub fn float(child: Flowable) -> Self {
        let mut float = Flowable::new(FlowableKind::Float);
        float.children = vec![child];
        float
    }

    pub fn group(children: Vec<Flowable>) -> Self {
        let mut group = Flowable::new(FlowableKind::Group);
        group.children = children;
        group
    }

    pub fn page_break() -> Self {
        Flowable::new(FlowableKind::PageBreak)
    }

    pub fn table_of_contents(levels: u8) -> Self {
        Flowable::new(FlowableKind::TableOfContents { levels })
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_style(mut self, style: StyleDecl) -> Self {
        self.style = style;
        self
    }

    /// Identifier used in diagnostics: the element id when assigned,
    /// otherwise the kind name.
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => self.kind_name().to_string(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            FlowableKind::Paragraph { .. } => "paragraph",
            FlowableKind::Heading { .. } => "heading",
            FlowableKind::List { .. } => "list",
            FlowableKind::ListItem => "list-item",
            FlowableKind::DefinitionList => "definition-list",
            FlowableKind::Definition { .. } => "definition",
            FlowableKind::Table { .. } => "table",
            FlowableKind::TableRow => "table-row",
            FlowableKind::TableCell { .. } => "table-cell",
            FlowableKind::Figure { .. } => "figure",
            FlowableKind::Section => "section",
            FlowableKind::Rule { .. } => "rule",
            FlowableKind::Float => "float",
            FlowableKind::Group => "group",
            FlowableKind::PageBreak => "page-break",
            FlowableKind::TableOfContents { .. } => "table-of-contents",
        }
    }
}

// ─── Resumable state ────────────────────────────────────────────

/// Snapshot of an interrupted render, sufficient to resume exactly the
/// unconsumed remainder. Copyable and comparable by design.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowState {
    Paragraph(ParagraphState),
    Group(GroupState),
    Table(TableState),
    /// The flowable renders from scratch in the next container.
    Restart,
}

/// State of a composite flowable: which child, and where inside it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupState {
    pub child_index: usize,
    pub child: Option<Box<FlowState>>,
    /// Set once a keep-together attempt has failed on a fresh container
    /// and the group is allowed to split.
    pub split: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TableState {
    pub next_row: usize,
}

impl FlowState {
    /// Whether this state is indistinguishable from "nothing consumed":
    /// resuming from it renders the whole flowable. Used to decide whether
    /// the current container received any of the element's content.
    pub fn is_pristine(&self) -> bool {
        match self {
            FlowState::Paragraph(p) => *p == ParagraphState::default(),
            FlowState::Group(g) => {
                g.child_index == 0 && g.child.as_ref().map_or(true, |c| c.is_pristine())
            }
            FlowState::Table(t) => t.next_row == 0,
            FlowState::Restart => true,
        }
    }
}

/// Result of flowing into a container.
#[derive(Debug)]
pub enum FlowOutcome {
    Complete { descender: f64 },
    Overflow(FlowState),
    /// A float was placed for the first time; the page must re-render.
    Reflow,
}

// ─── Rendering ──────────────────────────────────────────────────

impl Flowable {
    /// Flow into `container`: space-above (unless resuming), render,
    /// space-below. The only failure channel is `Fatal`; running out of
    /// room is an `Ok` outcome.
    pub fn flow<'p>(
        &'p self,
        ctx: &mut RenderCtx<'_>,
        arena: &mut ContainerArena,
        container: ContainerId,
        parent: Option<&'p StyleChain<'p>>,
        last_descender: f64,
        state: Option<FlowState>,
    ) -> Result<FlowOutcome, Fatal> {
        let chain = match parent {
            Some(p) => p.push(&self.style),
            None => StyleChain::root(&self.style),
        };
        let el = self.label();
        let resuming = state.is_some();

        if !resuming {
            let space = ctx.sheet.space_above(&el, &chain)?;
            if space > 0.0 && arena.advance(container, space).is_err() {
                return Ok(FlowOutcome::Overflow(self.initial_state()));
            }
        }

        let outcome = self.render(ctx, arena, container, &chain, last_descender, state)?;

        // The element's page is the one its content actually reached: an
        // overflow that consumed nothing leaves the recording to the next
        // container. First placement wins on re-encounters.
        if let Some(id) = &self.id {
            let placed_here = match &outcome {
                FlowOutcome::Complete { .. } => true,
                FlowOutcome::Overflow(state) => !state.is_pristine(),
                FlowOutcome::Reflow => false,
            };
            if placed_here {
                ctx.store.note_placement(id, ctx.page_number);
            }
        }

        if matches!(outcome, FlowOutcome::Complete { .. }) {
            let space = ctx.sheet.space_below(&el, &chain)?;
            if space > 0.0 {
                // Trailing space at a container boundary is simply dropped.
                let _ = arena.advance(container, space);
            }
        }
        Ok(outcome)
    }

    /// The state meaning "nothing consumed yet", per kind.
    pub(crate) fn initial_state(&self) -> FlowState {
        match &self.kind {
            FlowableKind::Paragraph { .. } | FlowableKind::Heading { .. } => {
                FlowState::Paragraph(ParagraphState::default())
            }
            FlowableKind::Table { .. } => FlowState::Table(TableState::default()),
            FlowableKind::List { .. }
            | FlowableKind::ListItem
            | FlowableKind::DefinitionList
            | FlowableKind::Definition { .. }
            | FlowableKind::Section
            | FlowableKind::Group
            | FlowableKind::TableOfContents { .. } => FlowState::Group(GroupState::default()),
            _ => FlowState::Restart,
        }
    }

    fn render(
        &self,
        ctx: &mut RenderCtx<'_>,
        arena: &mut ContainerArena,
        container: ContainerId,
        chain: &StyleChain<'_>,
        last_descender: f64,
        state: Option<FlowState>,
    ) -> Result<FlowOutcome, Fatal> {
        match &self.kind {
            FlowableKind::Paragraph { spans } => {
                self.render_text(ctx, arena, container, chain, spans, None, last_descender, state)
            }
            FlowableKind::Heading { spans, .. } => {
                let prefix = self
                    .id
                    .as_ref()
                    .and_then(|id| ctx.store.formatted_number(id))
                    .map(|n| format!("{n}  "));
                self.render_text(ctx, arena, container, chain, spans, prefix, last_descender, state)
            }
            FlowableKind::List { ordered } => {
                self.render_list(ctx, arena, container, chain, *ordered, last_descender, state)
            }
            FlowableKind::ListItem | FlowableKind::Section => {
                let group = group_state(state);
                self.render_children(ctx, arena, container, chain, last_descender, group)
            }
            FlowableKind::DefinitionList => {
                let group = group_state(state);
                self.render_children(ctx, arena, container, chain, last_descender, group)
            }
            FlowableKind::Definition { term } => {
                self.render_definition(ctx, arena, container, chain, term, last_descender, state)
            }
            FlowableKind::Table { columns, header_rows } => self.render_table(
                ctx,
                arena,
                container,
                chain,
                columns,
                *header_rows,
                state,
            ),
            FlowableKind::TableRow | FlowableKind::TableCell { .. } => {
                // Rows and cells are rendered by their owning table; a
                // stray one behaves as a plain group.
                let group = group_state(state);
                self.render_children(ctx, arena, container, chain, last_descender, group)
            }
            FlowableKind::Figure { source, width, height, caption } => self.render_figure(
                ctx,
                arena,
                container,
                chain,
                source,
                *width,
                *height,
                caption,
            ),
            FlowableKind::Rule { thickness } => {
                let width = arena.width(container);
                let before = arena.cursor(container);
                if arena.advance(container, *thickness).is_err() {
                    return Ok(FlowOutcome::Overflow(FlowState::Restart));
                }
                arena.draw(
                    container,
                    crate::backend::DrawCommand::Rule {
                        x: 0.0,
                        y: before + thickness / 2.0,
                        width,
                        thickness: *thickness,
                    },
                );
                Ok(FlowOutcome::Complete { descender: 0.0 })
            }
            FlowableKind::Float => self.render_float(ctx, arena, container, chain, last_descender, state),
            FlowableKind::Group => {
                self.render_group(ctx, arena, container, chain, last_descender, state)
            }
            FlowableKind::PageBreak => {
                if state.is_none() && arena.cursor(container) > EPSILON {
                    Ok(FlowOutcome::Overflow(FlowState::Restart))
                } else {
                    Ok(FlowOutcome::Complete { descender: 0.0 })
                }
            }
            FlowableKind::TableOfContents { levels } => {
                self.render_toc(ctx, arena, container, chain, *levels, last_descender, state)
            }
        }
    }

    // ── Paragraphs and headings ─────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn render_text(
        &self,
        ctx: &mut RenderCtx<'_>,
        arena: &mut ContainerArena,
        container: ContainerId,
        chain: &StyleChain<'_>,
        spans: &[Span],
        prefix: Option<String>,
        last_descender: f64,
        state: Option<FlowState>,
    ) -> Result<FlowOutcome, Fatal> {
        let el = self.label();
        let mut runs = Vec::with_capacity(spans.len() + 1);
        if let Some(prefix) = prefix {
            runs.push(InlineRun { text: prefix, font: resolve_font(ctx, &el, chain)?, note: None });
        }
        resolve_spans(ctx, &el, chain, spans, &mut runs)?;

        let spec = paragraph_spec(ctx, &el, chain, runs)?;
        let para_state = match state {
            Some(FlowState::Paragraph(p)) => Some(p),
            _ => None,
        };
        let mut hook = |ctx: &mut RenderCtx<'_>, arena: &mut ContainerArena, note: &str| {
            place_footnote(ctx, arena, note)
        };
        match render_paragraph(ctx, arena, container, &spec, para_state, last_descender, &mut hook)? {
            ParagraphOutcome::Complete { descender } => Ok(FlowOutcome::Complete { descender }),
            ParagraphOutcome::Overflow(p) => Ok(FlowOutcome::Overflow(FlowState::Paragraph(p))),
        }
    }

    // ── Sequential composites ───────────────────────────────────

    fn render_children(
        &self,
        ctx: &mut RenderCtx<'_>,
        arena: &mut ContainerArena,
        container: ContainerId,
        chain: &StyleChain<'_>,
        last_descender: f64,
        state: GroupState,
    ) -> Result<FlowOutcome, Fatal> {
        let mut index = state.child_index;
        let mut child_state = state.child.map(|boxed| *boxed);
        let mut descender = last_descender;
        while index < self.children.len() {
            let child = &self.children[index];
            match child.flow(ctx, arena, container, Some(chain), descender, child_state.take())? {
                FlowOutcome::Complete { descender: d } => {
                    descender = d;
                    index += 1;
                }
                FlowOutcome::Overflow(inner) => {
                    return Ok(FlowOutcome::Overflow(FlowState::Group(GroupState {
                        child_index: index,
                        child: Some(Box::new(inner)),
                        split: state.split,
                    })));
                }
                FlowOutcome::Reflow => return Ok(FlowOutcome::Reflow),
            }
        }
        Ok(FlowOutcome::Complete { descender })
    }

    /// A group: sequential by default; with `keep-together`, a scoped
    /// speculative attempt that commits whole or rolls back whole.
    fn render_group(
        &self,
        ctx: &mut RenderCtx<'_>,
        arena: &mut ContainerArena,
        container: ContainerId,
        chain: &StyleChain<'_>,
        last_descender: f64,
        state: Option<FlowState>,
    ) -> Result<FlowOutcome, Fatal> {
        let el = self.label();
        let keep = ctx.sheet.keep_together(&el, chain)?;
        let group = group_state(state);

        if keep && !group.split && group.child_index == 0 && group.child.is_none() {
            let fresh = arena.cursor(container) <= EPSILON;
            let checkpoint = arena.checkpoint();
            let snapshot = ctx.snapshot();
            match self.render_children(ctx, arena, container, chain, last_descender, GroupState::default())? {
                FlowOutcome::Complete { descender } => {
                    return Ok(FlowOutcome::Complete { descender });
                }
                FlowOutcome::Reflow => {
                    arena.restore(&checkpoint);
                    ctx.restore(snapshot);
                    return Ok(FlowOutcome::Reflow);
                }
                FlowOutcome::Overflow(_) => {
                    arena.restore(&checkpoint);
                    ctx.restore(snapshot);
                    if !fresh {
                        // Retry the whole group on the next container.
                        return Ok(FlowOutcome::Overflow(FlowState::Group(GroupState::default())));
                    }
                    // Does not fit even on a fresh container: split here.
                }
            }
        }

        let split = GroupState { split: true, ..group };
        self.render_children(ctx, arena, container, chain, last_descender, split)
    }

    // ── Lists ───────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn render_list(
        &self,
        ctx: &mut RenderCtx<'_>,
        arena: &mut ContainerArena,
        container: ContainerId,
        chain: &StyleChain<'_>,
        ordered: bool,
        last_descender: f64,
        state: Option<FlowState>,
    ) -> Result<FlowOutcome, Fatal> {
        let el = self.label();
        let font = resolve_font(ctx, &el, chain)?;
        let labels: Vec<String> = (0..self.children.len())
            .map(|i| if ordered { format!("{}.", i + 1) } else { "\u{2022}".to_string() })
            .collect();

        // Natural label-column width, measured off-page.
        let mut label_width: f64 = 0.0;
        for label in &labels {
            label_width = label_width.max(measure_text(ctx, label, &font));
        }
        let gap = font.size * 0.6;
        let body_left = label_width + gap;

        let group = group_state(state);
        let mut index = group.child_index;
        let mut child_state = group.child.map(|boxed| *boxed);
        let mut descender = last_descender;

        while index < self.children.len() {
            let item = &self.children[index];
            let resumed = child_state.is_some();
            let width = (arena.width(container) - body_left).max(0.0);
            let top = arena.cursor(container);
            let region = arena.sub_region(container, body_left, width);
            let outcome =
                item.flow(ctx, arena, region, Some(chain), descender, child_state.take())?;
            let consumed = arena.cursor(region);

            if !resumed && consumed > EPSILON {
                let metrics = ctx.fonts.metrics(&font);
                draw_label(ctx, arena, container, &labels[index], &font, top + metrics.ascender);
            }

            match outcome {
                FlowOutcome::Complete { descender: d } => {
                    descender = d;
                    index += 1;
                    if arena.advance(container, consumed).is_err() {
                        return Ok(FlowOutcome::Overflow(FlowState::Group(GroupState {
                            child_index: index,
                            child: None,
                            split: true,
                        })));
                    }
                }
                FlowOutcome::Overflow(inner) => {
                    let _ = arena.advance(container, consumed);
                    return Ok(FlowOutcome::Overflow(FlowState::Group(GroupState {
                        child_index: index,
                        child: Some(Box::new(inner)),
                        split: true,
                    })));
                }
                FlowOutcome::Reflow => return Ok(FlowOutcome::Reflow),
            }
        }
        Ok(FlowOutcome::Complete { descender })
    }

    // ── Definition lists ────────────────────────────────────────

    /// A term paragraph followed by an indented body. State child 0 is the
    /// term; children 1.. map onto the body flowables.
    #[allow(clippy::too_many_arguments)]
    fn render_definition(
        &self,
        ctx: &mut RenderCtx<'_>,
        arena: &mut ContainerArena,
        container: ContainerId,
        chain: &StyleChain<'_>,
        term: &[Span],
        last_descender: f64,
        state: Option<FlowState>,
    ) -> Result<FlowOutcome, Fatal> {
        let el = self.label();
        let GroupState { child_index, child, .. } = group_state(state);
        let mut child_state = child.map(|boxed| *boxed);
        let mut descender = last_descender;

        if child_index == 0 {
            let mut runs = Vec::new();
            resolve_spans(ctx, &el, chain, term, &mut runs)?;
            let spec = paragraph_spec(ctx, &el, chain, runs)?;
            let para_state = match child_state.take() {
                Some(FlowState::Paragraph(p)) => Some(p),
                _ => None,
            };
            let mut hook = |ctx: &mut RenderCtx<'_>, arena: &mut ContainerArena, note: &str| {
                place_footnote(ctx, arena, note)
            };
            match render_paragraph(ctx, arena, container, &spec, para_state, descender, &mut hook)? {
                ParagraphOutcome::Complete { descender: d } => descender = d,
                ParagraphOutcome::Overflow(p) => {
                    return Ok(FlowOutcome::Overflow(FlowState::Group(GroupState {
                        child_index: 0,
                        child: Some(Box::new(FlowState::Paragraph(p))),
                        split: true,
                    })));
                }
            }
        }

        // Indented definition body, one region for all children.
        let indent = ctx.sheet.font_size(&el, chain)? * 1.5;
        let width = (arena.width(container) - indent).max(0.0);
        let region = arena.sub_region(container, indent, width);
        let body_state = GroupState {
            child_index: child_index.saturating_sub(1),
            child: child_state.map(Box::new),
            split: true,
        };
        let outcome = self.render_children(ctx, arena, region, chain, descender, body_state)?;
        let consumed = arena.cursor(region);
        let _ = arena.advance(container, consumed);
        match outcome {
            FlowOutcome::Complete { descender } => Ok(FlowOutcome::Complete { descender }),
            FlowOutcome::Overflow(FlowState::Group(inner)) => {
                Ok(FlowOutcome::Overflow(FlowState::Group(GroupState {
                    child_index: inner.child_index + 1,
                    child: inner.child,
                    split: true,
                })))
            }
            FlowOutcome::Overflow(other) => Ok(FlowOutcome::Overflow(other)),
            FlowOutcome::Reflow => Ok(FlowOutcome::Reflow),
        }
    }

    // ── Tables ──────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn render_table(
        &self,
        ctx: &mut RenderCtx<'_>,
        arena: &mut ContainerArena,
        container: ContainerId,
        chain: &StyleChain<'_>,
        columns: &[f64],
        header_rows: usize,
        state: Option<FlowState>,
    ) -> Result<FlowOutcome, Fatal> {
        let width = arena.width(container);
        let col_widths = column_widths(columns, &self.children, width);
        let table_state = match state {
            Some(FlowState::Table(t)) => t,
            _ => TableState::default(),
        };

        let mut rendered_any = false;
        if table_state.next_row > 0 {
            // Resuming on a new container: repeat the header rows.
            for row_idx in 0..header_rows.min(self.children.len()) {
                match self.render_table_row(ctx, arena, container, chain, row_idx, &col_widths)? {
                    RowResult::Placed => rendered_any = true,
                    RowResult::Overflowed => {
                        return Ok(FlowOutcome::Overflow(FlowState::Table(table_state)));
                    }
                    RowResult::Reflow => return Ok(FlowOutcome::Reflow),
                }
            }
        }

        let start = table_state.next_row.max(if table_state.next_row > 0 { header_rows } else { 0 });
        for row_idx in start..self.children.len() {
            match self.render_table_row(ctx, arena, container, chain, row_idx, &col_widths)? {
                RowResult::Placed => rendered_any = true,
                RowResult::Overflowed => {
                    // A row that does not fit even at the top of a fresh
                    // container would loop forever; place a warning and
                    // skip it instead.
                    if !rendered_any && arena.cursor(container) <= EPSILON {
                        let label = self.label();
                        ctx.diags.warn(
                            format!("table row {row_idx} taller than a page, skipped"),
                            Some(label.as_str()),
                            Some(ctx.page_number),
                        );
                        continue;
                    }
                    return Ok(FlowOutcome::Overflow(FlowState::Table(TableState {
                        next_row: row_idx,
                    })));
                }
                RowResult::Reflow => return Ok(FlowOutcome::Reflow),
            }
        }
        Ok(FlowOutcome::Complete { descender: 0.0 })
    }

    fn render_table_row(
        &self,
        ctx: &mut RenderCtx<'_>,
        arena: &mut ContainerArena,
        container: ContainerId,
        chain: &StyleChain<'_>,
        row_idx: usize,
        col_widths: &[f64],
    ) -> Result<RowResult, Fatal> {
        let row = &self.children[row_idx];
        let pad = 3.0;

        // Measure every cell off-page first; footnote placement inside
        // cells is deferred until the row commits.
        ctx.page.defer_notes = true;
        let mut measured: Vec<(ContainerId, f64)> = Vec::new();
        let mut row_height: f64 = 0.0;
        let mut column = 0usize;
        let row_chain = chain.push(&row.style);
        for cell in &row.children {
            let span = match &cell.kind {
                FlowableKind::TableCell { col_span } => (*col_span).max(1),
                _ => 1,
            };
            let last = (column + span).min(col_widths.len());
            let cell_width: f64 = col_widths[column..last].iter().sum::<f64>() - 2.0 * pad;
            let x: f64 = col_widths[..column].iter().sum();
            let virt = arena.new_virtual(cell_width.max(0.0));
            match cell.flow(ctx, arena, virt, Some(&row_chain), 0.0, None)? {
                FlowOutcome::Complete { descender } => {
                    row_height = row_height.max(arena.cursor(virt) - descender);
                }
                FlowOutcome::Overflow(_) => {
                    // Virtual containers do not overflow; nothing to do.
                }
                FlowOutcome::Reflow => {
                    ctx.page.defer_notes = false;
                    ctx.page.deferred_notes.clear();
                    return Ok(RowResult::Reflow);
                }
            }
            measured.push((virt, x));
            column += span;
        }
        ctx.page.defer_notes = false;

        let top = arena.cursor(container);
        if arena.advance(container, row_height + 2.0 * pad).is_err() {
            ctx.page.deferred_notes.clear();
            return Ok(RowResult::Overflowed);
        }
        for (virt, x) in measured {
            arena.adopt_draws(virt, container, x + pad, top + pad);
        }
        let deferred: Vec<String> = ctx.page.deferred_notes.drain(..).collect();
        for note in deferred {
            place_footnote(ctx, arena, &note)?;
        }
        Ok(RowResult::Placed)
    }

    // ── Figures ─────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn render_figure(
        &self,
        ctx: &mut RenderCtx<'_>,
        arena: &mut ContainerArena,
        container: ContainerId,
        chain: &StyleChain<'_>,
        source: &str,
        width: f64,
        height: f64,
        caption: &[Span],
    ) -> Result<FlowOutcome, Fatal> {
        let el = self.label();
        let checkpoint = arena.checkpoint();
        let snapshot = ctx.snapshot();

        let attempt = self.try_figure(ctx, arena, container, chain, &el, source, width, height, caption)?;
        match attempt {
            Some(descender) => Ok(FlowOutcome::Complete { descender }),
            None => {
                arena.restore(&checkpoint);
                ctx.restore(snapshot);
                Ok(FlowOutcome::Overflow(FlowState::Restart))
            }
        }
    }

    /// One atomic figure attempt; `None` means it did not fit.
    #[allow(clippy::too_many_arguments)]
    fn try_figure(
        &self,
        ctx: &mut RenderCtx<'_>,
        arena: &mut ContainerArena,
        container: ContainerId,
        chain: &StyleChain<'_>,
        el: &str,
        source: &str,
        width: f64,
        height: f64,
        caption: &[Span],
    ) -> Result<Option<f64>, Fatal> {
        let avail = arena.width(container);
        let top = arena.cursor(container);
        if arena.advance(container, height).is_err() {
            return Ok(None);
        }
        arena.draw(
            container,
            crate::backend::DrawCommand::Image {
                x: ((avail - width) / 2.0).max(0.0),
                y: top,
                width: width.min(avail),
                height,
                source: source.to_string(),
            },
        );

        let mut runs = Vec::new();
        if let Some(number) = self.id.as_ref().and_then(|id| ctx.store.formatted_number(id)) {
            runs.push(InlineRun {
                text: format!("Figure {number}: "),
                font: resolve_font(ctx, el, chain)?,
                note: None,
            });
        }
        resolve_spans(ctx, el, chain, caption, &mut runs)?;
        let mut spec = paragraph_spec(ctx, el, chain, runs)?;
        spec.align = TextAlign::Center;
        let mut hook = |ctx: &mut RenderCtx<'_>, arena: &mut ContainerArena, note: &str| {
            place_footnote(ctx, arena, note)
        };
        match render_paragraph(ctx, arena, container, &spec, None, 0.0, &mut hook)? {
            ParagraphOutcome::Complete { descender } => Ok(Some(descender)),
            ParagraphOutcome::Overflow(_) => Ok(None),
        }
    }

    // ── Floats ──────────────────────────────────────────────────

    fn render_float(
        &self,
        ctx: &mut RenderCtx<'_>,
        arena: &mut ContainerArena,
        container: ContainerId,
        chain: &StyleChain<'_>,
        last_descender: f64,
        state: Option<FlowState>,
    ) -> Result<FlowOutcome, Fatal> {
        let Some(id) = self.id.clone() else {
            // Without a prepare-assigned identity the float cannot be
            // tracked; render inline instead.
            ctx.diags.warn(
                "float without an identifier renders in normal flow",
                None,
                Some(ctx.page_number),
            );
            let group = group_state(state);
            return self.render_children(ctx, arena, container, chain, last_descender, group);
        };

        if ctx.store.is_float_placed(&id) {
            return Ok(FlowOutcome::Complete { descender: last_descender });
        }
        if ctx.page.float_region.is_none() {
            // Measurement contexts have no float region; keep the content
            // in normal flow there.
            let group = group_state(state);
            return self.render_children(ctx, arena, container, chain, last_descender, group);
        }

        ctx.store.place_float(&id);
        ctx.page.new_floats.push(self.clone());
        Ok(FlowOutcome::Reflow)
    }

    /// Render this float's content into the page float region. Called by
    /// the page at the start of a render attempt, for every float placed
    /// on it so far.
    pub(crate) fn render_float_content(
        &self,
        ctx: &mut RenderCtx<'_>,
        arena: &mut ContainerArena,
        region: ContainerId,
    ) -> Result<(), Fatal> {
        let chain = StyleChain::root(&self.style);
        match self.render_children(ctx, arena, region, &chain, 0.0, GroupState::default())? {
            FlowOutcome::Complete { .. } | FlowOutcome::Reflow => Ok(()),
            FlowOutcome::Overflow(_) => {
                ctx.diags.warn(
                    "float content exceeds the float region, truncated",
                    self.id.as_deref(),
                    Some(ctx.page_number),
                );
                Ok(())
            }
        }
    }

    // ── Table of contents ───────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn render_toc(
        &self,
        ctx: &mut RenderCtx<'_>,
        arena: &mut ContainerArena,
        container: ContainerId,
        chain: &StyleChain<'_>,
        levels: u8,
        last_descender: f64,
        state: Option<FlowState>,
    ) -> Result<FlowOutcome, Fatal> {
        let el = self.label();
        let entries = ctx.store.toc_entries(levels);
        let group = group_state(state);
        let mut descender = last_descender;
        let width = arena.width(container);

        let mut index = group.child_index;
        let mut child_state = group.child.map(|boxed| *boxed);
        while index < entries.len() {
            let entry = &entries[index];
            let page_text = ctx.reference_text(&entry.id, RefKind::Page);
            let base = resolve_font(ctx, &el, chain)?;
            let indent = (entry.level.saturating_sub(1)) as f64 * base.size;
            let text = format!("{} {}\t{}", entry.number, entry.title, page_text);
            let runs = vec![InlineRun { text, font: base.clone(), note: None }];
            let mut spec = paragraph_spec(ctx, &el, chain, runs)?;
            spec.indent_first = indent;
            spec.tab_stops = vec![TabStop::right(width - base.size).with_fill('.')];
            spec.align = TextAlign::Left;
            spec.hyphenate = false;

            let para_state = match child_state.take() {
                Some(FlowState::Paragraph(p)) => Some(p),
                _ => None,
            };
            let mut hook = |ctx: &mut RenderCtx<'_>, arena: &mut ContainerArena, note: &str| {
                place_footnote(ctx, arena, note)
            };
            match render_paragraph(ctx, arena, container, &spec, para_state, descender, &mut hook)? {
                ParagraphOutcome::Complete { descender: d } => {
                    descender = d;
                    index += 1;
                }
                ParagraphOutcome::Overflow(p) => {
                    return Ok(FlowOutcome::Overflow(FlowState::Group(GroupState {
                        child_index: index,
                        child: Some(Box::new(FlowState::Paragraph(p))),
                        split: true,
                    })));
                }
            }
        }
        Ok(FlowOutcome::Complete { descender })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowResult {
    Placed,
    Overflowed,
    Reflow,
}

/// Concrete column widths from fractions of the table width. Without
/// explicit fractions, columns split evenly by the first row's cell count.
fn column_widths(columns: &[f64], rows: &[Flowable], width: f64) -> Vec<f64> {
    if columns.is_empty() {
        let n = rows.first().map(|r| r.children.len().max(1)).unwrap_or(1);
        return vec![width / n as f64; n];
    }
    let total: f64 = columns.iter().sum();
    if total <= 0.0 {
        vec![width / columns.len() as f64; columns.len()]
    } else {
        columns.iter().map(|f| f / total * width).collect()
    }
}

// ─── Shared helpers ─────────────────────────────────────────────

fn group_state(state: Option<FlowState>) -> GroupState {
    match state {
        Some(FlowState::Group(g)) => g,
        _ => GroupState::default(),
    }
}

/// Resolve the effective font for an element through the cascade.
pub(crate) fn resolve_font(
    ctx: &RenderCtx<'_>,
    el: &str,
    chain: &StyleChain<'_>,
) -> Result<FontSpec, Fatal> {
    Ok(FontSpec {
        family: ctx.sheet.font_family(el, chain)?,
        weight: ctx.sheet.font_weight(el, chain)?,
        slant: ctx.sheet.font_slant(el, chain)?,
        size: ctx.sheet.font_size(el, chain)?,
        variant: if ctx.sheet.small_caps(el, chain)? {
            FontVariant::SmallCaps
        } else {
            FontVariant::Normal
        },
    })
}

/// Build the paragraph parameters an element's cascade implies.
fn paragraph_spec(
    ctx: &RenderCtx<'_>,
    el: &str,
    chain: &StyleChain<'_>,
    runs: Vec<InlineRun>,
) -> Result<ParagraphSpec, Fatal> {
    Ok(ParagraphSpec {
        runs,
        base_font: resolve_font(ctx, el, chain)?,
        align: ctx.sheet.text_align(el, chain)?,
        line_spacing: ctx.sheet.line_spacing(el, chain)?,
        indent_first: ctx.sheet.indent_first(el, chain)?,
        tab_stops: ctx.sheet.tab_stops(el, chain)?,
        hyphenate: ctx.sheet.hyphenate(el, chain)?,
        lang: ctx.sheet.language(el, chain)?,
        element: el.to_string(),
    })
}

/// Turn spans into shaped-ready runs, resolving references and numbering
/// footnote marks.
fn resolve_spans(
    ctx: &mut RenderCtx<'_>,
    el: &str,
    chain: &StyleChain<'_>,
    spans: &[Span],
    runs: &mut Vec<InlineRun>,
) -> Result<(), Fatal> {
    for span in spans {
        match span {
            Span::Text { content, style } => {
                let span_chain = chain.push(style);
                runs.push(InlineRun {
                    text: content.clone(),
                    font: resolve_font(ctx, el, &span_chain)?,
                    note: None,
                });
            }
            Span::Reference { target, show, style } => {
                let span_chain = chain.push(style);
                let font = resolve_font(ctx, el, &span_chain)?;
                let text = ctx.reference_text(target, *show);
                runs.push(InlineRun { text, font, note: None });
            }
            Span::NoteMark { note } => {
                if !ctx.notes.contains_key(note) {
                    ctx.diags.warn(
                        format!("footnote marker references unknown note '{note}'"),
                        Some(el),
                        Some(ctx.page_number),
                    );
                    runs.push(InlineRun {
                        text: "?".to_string(),
                        font: resolve_font(ctx, el, chain)?,
                        note: None,
                    });
                    continue;
                }
                let number = ctx.store.footnote_number(note);
                let mut font = resolve_font(ctx, el, chain)?;
                font.size *= 0.65;
                runs.push(InlineRun {
                    text: number.to_string(),
                    font,
                    note: Some(note.clone()),
                });
            }
        }
    }
    Ok(())
}

/// Width of a short text in a font, measured glyph by glyph.
fn measure_text(ctx: &RenderCtx<'_>, text: &str, font: &FontSpec) -> f64 {
    text.chars()
        .map(|ch| {
            ctx.fonts
                .glyph(ch, font)
                .map(|g| g.advance)
                .unwrap_or(font.size * 0.5)
        })
        .sum()
}

fn draw_label(
    ctx: &RenderCtx<'_>,
    arena: &mut ContainerArena,
    container: ContainerId,
    label: &str,
    font: &FontSpec,
    baseline: f64,
) {
    let mut placed = Vec::new();
    let mut x = 0.0;
    for ch in label.chars() {
        if let Some(glyph) = ctx.fonts.glyph(ch, font) {
            placed.push(crate::backend::PlacedGlyph { glyph, x });
            x += glyph.advance;
        }
    }
    if !placed.is_empty() {
        arena.draw(
            container,
            crate::backend::DrawCommand::GlyphRun {
                x: 0.0,
                y: baseline,
                font: font.clone(),
                glyphs: placed,
            },
        );
    }
}

/// Queue a note body into the page's footnote region, once per note per
/// pass, numbering monotonically at first marker encounter.
pub(crate) fn place_footnote(
    ctx: &mut RenderCtx<'_>,
    arena: &mut ContainerArena,
    note_id: &str,
) -> Result<(), Fatal> {
    if ctx.page.defer_notes {
        ctx.page.deferred_notes.push(note_id.to_string());
        return Ok(());
    }
    if ctx.store.is_footnote_placed(note_id) {
        return Ok(());
    }
    let Some(region) = ctx.page.footnote_region else {
        return Ok(());
    };
    let Some(body) = ctx.notes.get(note_id).cloned() else {
        return Ok(());
    };
    ctx.store.mark_footnote_placed(note_id);
    let number = ctx.store.footnote_number(note_id);
    let body = prefix_note_number(body, number);
    match body.flow(ctx, arena, region, None, 0.0, None)? {
        FlowOutcome::Complete { .. } | FlowOutcome::Reflow => Ok(()),
        FlowOutcome::Overflow(_) => {
            ctx.diags.warn(
                format!("footnote '{note_id}' does not fit on the page, truncated"),
                None,
                Some(ctx.page_number),
            );
            Ok(())
        }
    }
}

/// Prefix a note body's first paragraph with its assigned number.
fn prefix_note_number(mut body: Flowable, number: usize) -> Flowable {
    if let FlowableKind::Paragraph { spans } = &mut body.kind {
        spans.insert(0, Span::text(&format!("{number}. ")));
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_shape_the_tree() {
        let list = Flowable::list(
            true,
            vec![vec![Flowable::paragraph("a")], vec![Flowable::paragraph("b")]],
        );
        assert_eq!(list.children.len(), 2);
        assert!(matches!(list.children[0].kind, FlowableKind::ListItem));

        let table = Flowable::table(
            vec![0.5, 0.5],
            1,
            vec![vec![Flowable::paragraph("h1"), Flowable::paragraph("h2")]],
        );
        assert!(matches!(table.children[0].kind, FlowableKind::TableRow));
        assert_eq!(table.children[0].children.len(), 2);
    }

    #[test]
    fn test_initial_state_matches_kind() {
        assert_eq!(
            Flowable::paragraph("x").initial_state(),
            FlowState::Paragraph(ParagraphState::default())
        );
        assert_eq!(
            Flowable::group(vec![]).initial_state(),
            FlowState::Group(GroupState::default())
        );
        assert_eq!(Flowable::page_break().initial_state(), FlowState::Restart);
    }

    #[test]
    fn test_group_state_is_recursive_and_comparable() {
        let inner = FlowState::Paragraph(ParagraphState::default());
        let outer = FlowState::Group(GroupState {
            child_index: 2,
            child: Some(Box::new(inner.clone())),
            split: false,
        });
        let copy = outer.clone();
        assert_eq!(outer, copy);
        match outer {
            FlowState::Group(g) => assert_eq!(*g.child.unwrap(), inner),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_pristine_states_mean_nothing_consumed() {
        assert!(FlowState::Restart.is_pristine());
        assert!(FlowState::Paragraph(ParagraphState::default()).is_pristine());
        assert!(FlowState::Group(GroupState {
            child_index: 0,
            child: Some(Box::new(FlowState::Restart)),
            split: true,
        })
        .is_pristine());

        let mut consumed = ParagraphState::default();
        consumed.lines_done = 1;
        assert!(!FlowState::Paragraph(consumed.clone()).is_pristine());
        assert!(!FlowState::Group(GroupState {
            child_index: 0,
            child: Some(Box::new(FlowState::Paragraph(consumed))),
            split: false,
        })
        .is_pristine());
        assert!(!FlowState::Table(TableState { next_row: 3 }).is_pristine());
    }

    #[test]
    fn test_note_prefix_lands_in_first_paragraph() {
        let body = Flowable::paragraph("the note text");
        let prefixed = prefix_note_number(body, 3);
        match prefixed.kind {
            FlowableKind::Paragraph { spans } => match &spans[0] {
                Span::Text { content, .. } => assert_eq!(content, "3. "),
                _ => panic!("expected text span"),
            },
            _ => unreachable!(),
        }
    }
}
