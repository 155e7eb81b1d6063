//! # Document and the Convergence Loop
//!
//! The document owns the content tree, the stylesheet, the font service,
//! and the reference store, and drives the three-phase state machine:
//!
//! 1. **Prepared** — one depth-first walk assigns identifiers and counter
//!    values in document order. Runs exactly once.
//! 2. **Laying out** — pages are created on demand while the chain reports
//!    it needs room; each page's render is retried from scratch when a
//!    first-time float placement signals a reflow.
//! 3. **Converged** — after a full pass, the (page count, id → page table)
//!    pair is compared against the previous pass — seeded from the
//!    persisted cache on the very first one. Unequal means every page is
//!    discarded and the whole layout reruns; equal means the cache is
//!    written and the pages stand.
//!
//! An iteration cap (default 10 passes) turns a pathological oscillation
//! into a diagnosed failure instead of an endless loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use crate::backend::{Backend, PageOutput};
use crate::chain::{Chain, ChainStatus};
use crate::error::{Diagnostics, Fatal, Warning};
use crate::flowable::{Flowable, FlowableKind, Span};
use crate::font::FontService;
use crate::layout::ContainerId;
use crate::page::{Page, PageOptions};
use crate::reference::{
    HeadingCounters, NumberFormat, RefKind, ReferenceCache, ReferenceStore, StoreSnapshot,
};
use crate::style::StyleSheet;

/// Document-wide configuration.
#[derive(Debug, Clone)]
pub struct DocumentOptions {
    pub page: PageOptions,
    /// Convergence iteration cap; exceeding it is a fatal diagnosis.
    pub max_passes: usize,
    /// Safety valve against runaway page production within one pass.
    pub max_pages_per_pass: usize,
    /// Where the reference cache persists between invocations.
    pub cache_path: Option<PathBuf>,
    /// Numbering scheme per heading level; Arabic beyond the list.
    pub heading_formats: Vec<NumberFormat>,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        DocumentOptions {
            page: PageOptions::default(),
            max_passes: 10,
            max_pages_per_pass: 2000,
            cache_path: None,
            heading_formats: Vec::new(),
        }
    }
}

/// Per-page hooks threaded to flowables through the render context.
#[derive(Default)]
pub struct PageHooks {
    pub float_region: Option<ContainerId>,
    pub footnote_region: Option<ContainerId>,
    /// Floats placed for the first time during this attempt; the page
    /// picks them up when it restarts.
    pub new_floats: Vec<Flowable>,
    /// While set, footnote placements queue instead of rendering — used
    /// during table cell measurement.
    pub defer_notes: bool,
    pub deferred_notes: Vec<String>,
}

/// Everything a flowable needs while rendering, threaded explicitly —
/// there is no ambient document global.
pub struct RenderCtx<'a> {
    pub sheet: &'a StyleSheet,
    pub fonts: &'a dyn FontService,
    pub diags: &'a mut Diagnostics,
    pub store: &'a mut ReferenceStore,
    pub notes: &'a HashMap<String, Flowable>,
    /// The id → page table of the previous pass; forward references
    /// resolve from it so reference text is stable within a pass.
    pub prev_pages: &'a HashMap<String, usize>,
    /// 1-based page being rendered.
    pub page_number: usize,
    pub page: PageHooks,
}

/// Rollback point for speculative attempts: the layout-mutable store
/// state plus the warning high-water mark.
pub struct CtxSnapshot {
    store: StoreSnapshot,
    diags: usize,
}

impl RenderCtx<'_> {
    /// Resolve a reference span's text. Unknown targets warn and render a
    /// placeholder; a known target not yet paged is a quiet placeholder
    /// that the next pass resolves.
    pub fn reference_text(&mut self, target: &str, kind: RefKind) -> String {
        if !self.store.known(target) && !self.notes.contains_key(target) {
            self.diags.warn(
                format!("reference to unknown id '{target}'"),
                None,
                Some(self.page_number),
            );
            return "?".to_string();
        }
        match kind {
            RefKind::Number => self
                .store
                .formatted_number(target)
                .unwrap_or_else(|| "?".to_string()),
            RefKind::Title => self.store.title(target).unwrap_or_default(),
            RefKind::Page => self
                .prev_pages
                .get(target)
                .map(|p| p.to_string())
                .unwrap_or_else(|| "?".to_string()),
        }
    }

    pub fn snapshot(&self) -> CtxSnapshot {
        CtxSnapshot { store: self.store.snapshot(), diags: self.diags.len() }
    }

    pub fn restore(&mut self, snapshot: CtxSnapshot) {
        self.store.restore(snapshot.store);
        self.diags.truncate(snapshot.diags);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    New,
    Prepared,
    Converged,
}

/// The document: content, styles, fonts, references, and the layout loop.
pub struct Document {
    content: Vec<Flowable>,
    notes: HashMap<String, Flowable>,
    sheet: StyleSheet,
    fonts: Box<dyn FontService>,
    options: DocumentOptions,
    store: ReferenceStore,
    diags: Diagnostics,
    phase: Phase,
    pages: Vec<PageOutput>,
    passes_run: usize,
}

impl Document {
    pub fn new(sheet: StyleSheet, fonts: Box<dyn FontService>, options: DocumentOptions) -> Self {
        Document {
            content: Vec::new(),
            notes: HashMap::new(),
            sheet,
            fonts,
            options,
            store: ReferenceStore::new(),
            diags: Diagnostics::new(),
            phase: Phase::New,
            pages: Vec::new(),
            passes_run: 0,
        }
    }

    /// Hand a top-level flowable to the document chain.
    pub fn append(&mut self, flowable: Flowable) {
        debug_assert!(self.phase == Phase::New, "content added after prepare");
        self.content.push(flowable);
    }

    /// Register a footnote body under its note id.
    pub fn add_note(&mut self, id: &str, body: Flowable) {
        self.notes.insert(id.to_string(), body);
    }

    pub fn warnings(&self) -> &[Warning] {
        self.diags.warnings()
    }

    /// Pages of the last converged pass.
    pub fn pages(&self) -> &[PageOutput] {
        &self.pages
    }

    /// How many full layout passes the last `run_layout` took.
    pub fn passes_run(&self) -> usize {
        self.passes_run
    }

    /// Emit the converged pages to a backend.
    pub fn render_to(&self, backend: &mut dyn Backend) -> Result<(), Fatal> {
        for page in &self.pages {
            backend.render_page(page)?;
        }
        backend.finish()
    }

    // ── Prepare ─────────────────────────────────────────────────

    /// Assign identifiers and counter values, once, in document order.
    pub fn prepare(&mut self) {
        if self.phase != Phase::New {
            log::debug!("prepare called twice, ignoring");
            return;
        }
        let mut counters = PrepareCounters {
            headings: HeadingCounters::new(self.options.heading_formats.clone()),
            figures: 0,
            tables: 0,
            floats: 0,
        };
        let mut content = std::mem::take(&mut self.content);
        for flowable in &mut content {
            prepare_flowable(flowable, &mut self.store, &mut counters);
        }
        self.content = content;

        for id in self.notes.keys() {
            if !self.store.known(id) {
                self.store.register(id, String::new(), String::new());
            }
        }
        self.phase = Phase::Prepared;
    }

    // ── Layout ──────────────────────────────────────────────────

    /// Run full layout passes until page count and reference table
    /// stabilize; persist the cache and return the page count.
    pub fn run_layout(&mut self) -> Result<usize, Fatal> {
        if self.phase == Phase::New {
            self.prepare();
        }
        let flowables = Rc::new(self.content.clone());

        let cached = match &self.options.cache_path {
            Some(path) => ReferenceCache::load(path)?,
            None => None,
        };
        let mut previous = cached.map(|c| (c.page_count, c.pages));
        let mut prev_lookup: HashMap<String, usize> = previous
            .as_ref()
            .map(|(_, pages)| pages.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default();

        self.passes_run = 0;
        loop {
            self.passes_run += 1;
            if self.passes_run > self.options.max_passes {
                return Err(Fatal::NonConvergence { passes: self.options.max_passes });
            }
            log::debug!("layout pass {}", self.passes_run);

            self.store.reset_pass();
            self.diags = Diagnostics::new();
            let mut chain = Chain::new(flowables.clone());
            let mut pages_out: Vec<PageOutput> = Vec::new();

            while !chain.is_done() {
                let page_no = pages_out.len() + 1;
                if page_no > self.options.max_pages_per_pass {
                    self.diags.warn(
                        "page limit reached, truncating the pass",
                        None,
                        Some(page_no),
                    );
                    break;
                }
                let output = self.render_page(&mut chain, page_no, &prev_lookup)?;
                pages_out.push(output);
            }

            let page_count = pages_out.len();
            let table = self.store.page_table();
            let converged = previous
                .as_ref()
                .map_or(false, |(count, pages)| *count == page_count && *pages == table);

            if converged {
                if let Some(path) = &self.options.cache_path {
                    ReferenceCache { page_count, pages: table }.save(path)?;
                }
                self.pages = pages_out;
                self.phase = Phase::Converged;
                log::debug!(
                    "converged after {} passes, {page_count} pages",
                    self.passes_run
                );
                return Ok(page_count);
            }

            prev_lookup = table.iter().map(|(k, v)| (k.clone(), *v)).collect();
            previous = Some((page_count, table));
        }
    }

    /// Render one page, retrying from scratch while floats keep arriving.
    /// Float space only grows per page, so the retry loop terminates.
    fn render_page(
        &mut self,
        chain: &mut Chain,
        page_no: usize,
        prev_pages: &HashMap<String, usize>,
    ) -> Result<PageOutput, Fatal> {
        let chain_start = chain.state.clone();
        let store_snapshot = self.store.snapshot();
        let diag_mark = self.diags.len();
        let mut floats: Vec<Flowable> = Vec::new();

        loop {
            chain.state = chain_start.clone();
            self.store.restore(store_snapshot.clone());
            self.diags.truncate(diag_mark);

            let mut page = Page::build(&self.options.page, page_no);
            let mut ctx = RenderCtx {
                sheet: &self.sheet,
                fonts: self.fonts.as_ref(),
                diags: &mut self.diags,
                store: &mut self.store,
                notes: &self.notes,
                prev_pages,
                page_number: page_no,
                page: PageHooks {
                    float_region: Some(page.float_region),
                    footnote_region: Some(page.footnote_region),
                    ..Default::default()
                },
            };

            for float in &floats {
                float.render_float_content(&mut ctx, &mut page.arena, page.float_region)?;
            }
            page.render_decorations(&mut ctx)?;

            let mut reflow = false;
            for column in page.columns.clone() {
                match chain.render_into(&mut ctx, &mut page.arena, column)? {
                    ChainStatus::Done => break,
                    ChainStatus::NeedsContainer => continue,
                    ChainStatus::Reflow => {
                        reflow = true;
                        break;
                    }
                }
            }

            let new_floats = std::mem::take(&mut ctx.page.new_floats);
            drop(ctx);

            if reflow {
                floats.extend(new_floats);
                continue;
            }

            self.store.commit_page();
            return Ok(page.into_output());
        }
    }
}

struct PrepareCounters {
    headings: HeadingCounters,
    figures: usize,
    tables: usize,
    floats: usize,
}

fn prepare_flowable(
    flowable: &mut Flowable,
    store: &mut ReferenceStore,
    counters: &mut PrepareCounters,
) {
    match &flowable.kind {
        FlowableKind::Heading { level, spans } => {
            let level = *level;
            let number = counters.headings.advance(level);
            let title = plain_text(spans);
            let id = flowable
                .id
                .get_or_insert_with(|| format!("heading-{number}"))
                .clone();
            store.register_heading(&id, level, number, title);
        }
        FlowableKind::Figure { caption, .. } => {
            counters.figures += 1;
            let number = counters.figures.to_string();
            let title = plain_text(caption);
            let id = flowable
                .id
                .get_or_insert_with(|| format!("figure-{number}"))
                .clone();
            store.register(&id, number, title);
        }
        FlowableKind::Table { .. } => {
            counters.tables += 1;
            let number = counters.tables.to_string();
            let id = flowable
                .id
                .get_or_insert_with(|| format!("table-{number}"))
                .clone();
            store.register(&id, number, String::new());
        }
        FlowableKind::Float => {
            counters.floats += 1;
            let n = counters.floats;
            let id = flowable
                .id
                .get_or_insert_with(|| format!("float-{n}"))
                .clone();
            store.register(&id, String::new(), String::new());
        }
        _ => {
            if let Some(id) = &flowable.id {
                if !store.known(id) {
                    store.register(id, String::new(), String::new());
                }
            }
        }
    }
    for child in &mut flowable.children {
        prepare_flowable(child, store, counters);
    }
}

/// Concatenated plain text of spans, for titles.
fn plain_text(spans: &[Span]) -> String {
    let mut out = String::new();
    for span in spans {
        if let Span::Text { content, .. } = span {
            out.push_str(content);
        }
    }
    out
}
