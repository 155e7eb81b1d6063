//! Integration tests for the layout pipeline.
//!
//! These exercise the full path from flowable construction to placed
//! glyph runs. They verify:
//! - the split/resume round trip places every glyph exactly once
//! - justification fills non-final lines and never the last
//! - the convergence loop resolves forward references in two passes
//! - a converged cache makes the next run a single pass
//! - footnotes, floats, tables, and keep-together groups land where the
//!   design says they must

use std::collections::HashMap;

use galley::document::PageHooks;
use galley::dimension::Dim;
use galley::flowable::{FlowState, Flowable, Span};
use galley::font::FixedAdvanceFont;
use galley::layout::{ContainerArena, ContainerId, ContainerKind};
use galley::style::Style;
use galley::{
    Diagnostics, Document, DocumentOptions, DrawCommand, Fatal, FlowOutcome, Margins, PageOptions,
    PageSize, RecordingBackend, RenderCtx, StyleDecl, StyleSheet, TextAlign,
};

// ─── Helpers ────────────────────────────────────────────────────

/// Owned state behind a flow-level render context.
struct Harness {
    sheet: StyleSheet,
    fonts: FixedAdvanceFont,
    diags: Diagnostics,
    store: galley::reference::ReferenceStore,
    notes: HashMap<String, Flowable>,
    prev: HashMap<String, usize>,
}

impl Harness {
    fn new() -> Self {
        Harness {
            sheet: StyleSheet::with_defaults(),
            fonts: FixedAdvanceFont::new(),
            diags: Diagnostics::new(),
            store: galley::reference::ReferenceStore::new(),
            notes: HashMap::new(),
            prev: HashMap::new(),
        }
    }

    fn ctx(&mut self) -> RenderCtx<'_> {
        self.ctx_on(1)
    }

    fn ctx_on(&mut self, page: usize) -> RenderCtx<'_> {
        RenderCtx {
            sheet: &self.sheet,
            fonts: &self.fonts,
            diags: &mut self.diags,
            store: &mut self.store,
            notes: &self.notes,
            prev_pages: &self.prev,
            page_number: page,
            page: PageHooks::default(),
        }
    }
}

/// All characters drawn into a container, in command order.
fn container_text(arena: &mut ContainerArena, id: ContainerId) -> String {
    let mut out = String::new();
    for command in arena.take_draw(id) {
        if let DrawCommand::GlyphRun { glyphs, .. } = command {
            for g in glyphs {
                out.push(g.glyph.ch);
            }
        }
    }
    out
}

fn small_page(width: f64, height: f64) -> PageOptions {
    PageOptions {
        size: PageSize::Custom { width, height },
        margin: Margins::uniform(10.0),
        ..Default::default()
    }
}

fn doc_with(options: DocumentOptions) -> Document {
    Document::new(
        StyleSheet::with_defaults(),
        Box::new(FixedAdvanceFont::new()),
        options,
    )
}

fn size10() -> StyleDecl {
    StyleDecl::inline(Style { font_size: Some(10.0), ..Default::default() })
}

/// Right edge of each baseline's drawn content, top to bottom.
fn line_extents(commands: &[DrawCommand]) -> Vec<(f64, f64)> {
    let mut lines: Vec<(f64, f64)> = Vec::new();
    for command in commands {
        if let DrawCommand::GlyphRun { x, y, glyphs, .. } = command {
            let right = x + glyphs.last().map(|g| g.x + g.glyph.advance).unwrap_or(0.0);
            match lines.iter_mut().find(|(ly, _)| (*ly - y).abs() < 0.001) {
                Some((_, edge)) => *edge = edge.max(right),
                None => lines.push((*y, right)),
            }
        }
    }
    lines.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    lines
}

// ─── Split/resume round trip ────────────────────────────────────

#[test]
fn test_split_resume_places_every_glyph_exactly_once() {
    let words = "alfa beta gama delt epsi zeta etaa thet iota kapa lamb muuu";
    let para = Flowable::paragraph(words).with_style(size10());

    // One unbounded container.
    let mut harness = Harness::new();
    let mut arena = ContainerArena::new();
    let unbounded = arena.new_virtual(45.0);
    let outcome = para
        .flow(&mut harness.ctx(), &mut arena, unbounded, None, 0.0, None)
        .unwrap();
    assert!(matches!(outcome, FlowOutcome::Complete { .. }));
    let reference = container_text(&mut arena, unbounded);

    // A bounded container, then resume into a second unbounded one.
    let mut harness = Harness::new();
    let mut arena = ContainerArena::new();
    let bounded = arena.add_root(Dim::pt(45.0), Dim::pt(50.0), ContainerKind::Fixed);
    let state = match para
        .flow(&mut harness.ctx(), &mut arena, bounded, None, 0.0, None)
        .unwrap()
    {
        FlowOutcome::Overflow(state) => state,
        other => panic!("expected overflow in a 50pt container, got {other:?}"),
    };
    let first = container_text(&mut arena, bounded);
    assert!(!first.is_empty(), "some lines must land before the split");

    let rest = arena.new_virtual(45.0);
    let outcome = para
        .flow(&mut harness.ctx(), &mut arena, rest, None, 0.0, Some(state))
        .unwrap();
    assert!(matches!(outcome, FlowOutcome::Complete { .. }));
    let second = container_text(&mut arena, rest);

    assert_eq!(
        format!("{first}{second}"),
        reference,
        "split + resume must equal the single-container rendering"
    );
}

#[test]
fn test_resume_state_is_comparable_and_copyable() {
    let para = Flowable::paragraph("aaaa bbbb cccc dddd eeee ffff gggg hhhh")
        .with_style(size10());
    let mut harness = Harness::new();
    let mut arena = ContainerArena::new();
    let bounded = arena.add_root(Dim::pt(45.0), Dim::pt(30.0), ContainerKind::Fixed);
    let state = match para
        .flow(&mut harness.ctx(), &mut arena, bounded, None, 0.0, None)
        .unwrap()
    {
        FlowOutcome::Overflow(state) => state,
        other => panic!("expected overflow, got {other:?}"),
    };
    let copy = state.clone();
    assert_eq!(state, copy);
    assert!(matches!(state, FlowState::Paragraph(_)));
}

#[test]
fn test_element_page_is_where_its_content_lands() {
    let para = Flowable::paragraph("word word word")
        .with_style(size10())
        .with_id("tgt");
    let mut harness = Harness::new();
    harness.store.register("tgt", String::new(), String::new());
    let mut arena = ContainerArena::new();

    // Too short for even one line: the whole paragraph moves on.
    let bottom = arena.add_root(Dim::pt(100.0), Dim::pt(6.0), ContainerKind::Fixed);
    let state = match para
        .flow(&mut harness.ctx_on(1), &mut arena, bottom, None, 0.0, None)
        .unwrap()
    {
        FlowOutcome::Overflow(state) => state,
        other => panic!("expected overflow in a 6pt container, got {other:?}"),
    };
    harness.store.commit_page();
    assert_eq!(
        harness.store.page_of("tgt"),
        None,
        "a page that held none of the content must not claim the element"
    );

    let next = arena.new_virtual(100.0);
    let outcome = para
        .flow(&mut harness.ctx_on(2), &mut arena, next, None, 0.0, Some(state))
        .unwrap();
    assert!(matches!(outcome, FlowOutcome::Complete { .. }));
    harness.store.commit_page();
    assert_eq!(harness.store.page_of("tgt"), Some(2));
}

// ─── Overflow arithmetic ────────────────────────────────────────

#[test]
fn test_space_above_plus_content_overflows_a_tight_container() {
    // 100pt container, 10pt space above, content requiring 95pt.
    let rule = Flowable::rule(95.0).with_style(StyleDecl::inline(Style {
        space_above: Some(10.0),
        ..Default::default()
    }));
    let mut harness = Harness::new();
    let mut arena = ContainerArena::new();
    let tight = arena.add_root(Dim::pt(100.0), Dim::pt(100.0), ContainerKind::Fixed);
    let outcome = rule
        .flow(&mut harness.ctx(), &mut arena, tight, None, 0.0, None)
        .unwrap();
    assert!(matches!(outcome, FlowOutcome::Overflow(_)), "10 + 95 > 100");

    // The same content fits a 105pt container.
    let mut arena = ContainerArena::new();
    let roomy = arena.add_root(Dim::pt(100.0), Dim::pt(105.0), ContainerKind::Fixed);
    let outcome = rule
        .flow(&mut harness.ctx(), &mut arena, roomy, None, 0.0, None)
        .unwrap();
    assert!(matches!(outcome, FlowOutcome::Complete { .. }));
}

// ─── Justification ──────────────────────────────────────────────

#[test]
fn test_justified_lines_fill_the_width_except_the_last() {
    let style = StyleDecl::inline(Style {
        font_size: Some(10.0),
        text_align: Some(TextAlign::Justify),
        hyphenate: Some(false),
        ..Default::default()
    });
    let para = Flowable::paragraph("aaaa bbbb aaaa bbbb cc").with_style(style);

    let mut harness = Harness::new();
    let mut arena = ContainerArena::new();
    let container = arena.add_root(Dim::pt(60.0), Dim::pt(200.0), ContainerKind::Fixed);
    para.flow(&mut harness.ctx(), &mut arena, container, None, 0.0, None)
        .unwrap();

    let commands = arena.take_draw(container);
    let lines = line_extents(&commands);
    assert_eq!(lines.len(), 3);
    for (_, edge) in &lines[..lines.len() - 1] {
        assert!(
            (edge - 60.0).abs() < 0.01,
            "justified line must fill the width, got {edge}"
        );
    }
    let (_, last_edge) = lines[lines.len() - 1];
    assert!(last_edge < 59.0, "the final line is never stretched");
}

// ─── Hyphenation ────────────────────────────────────────────────

#[test]
fn test_hyphenated_break_reconstructs_the_word() {
    let para = Flowable::paragraph("hyphenation").with_style(size10());
    let mut harness = Harness::new();
    let mut arena = ContainerArena::new();
    // 40pt: eight 5pt characters per line; the word is eleven.
    let container = arena.add_root(Dim::pt(40.0), Dim::pt(200.0), ContainerKind::Fixed);
    para.flow(&mut harness.ctx(), &mut arena, container, None, 0.0, None)
        .unwrap();
    let text = container_text(&mut arena, container);
    assert!(text.contains('-'), "a hyphen must be inserted, got '{text}'");
    assert_eq!(text.replace('-', ""), "hyphenation");
    assert!(harness.diags.is_empty(), "hyphenated fit needs no warning");
}

#[test]
fn test_unfittable_word_is_placed_anyway_with_a_warning() {
    let para = Flowable::paragraph("xyzqwrtk").with_style(StyleDecl::inline(Style {
        font_size: Some(10.0),
        hyphenate: Some(false),
        ..Default::default()
    }));
    let mut harness = Harness::new();
    let mut arena = ContainerArena::new();
    let container = arena.add_root(Dim::pt(20.0), Dim::pt(200.0), ContainerKind::Fixed);
    para.flow(&mut harness.ctx(), &mut arena, container, None, 0.0, None)
        .unwrap();
    let text = container_text(&mut arena, container);
    assert!(text.contains("xyzqwrtk"), "content is never dropped");
    assert!(
        harness
            .diags
            .warnings()
            .iter()
            .any(|w| w.message.contains("does not fit")),
        "placing an unfittable word warns"
    );
}

// ─── Convergence ────────────────────────────────────────────────

fn forward_ref_document(cache: Option<std::path::PathBuf>) -> Document {
    let mut d = doc_with(DocumentOptions {
        page: small_page(200.0, 150.0),
        cache_path: cache,
        ..Default::default()
    });
    d.append(Flowable::paragraph_spans(vec![
        Span::text("see page "),
        Span::page_ref("target"),
    ]));
    for _ in 0..12 {
        d.append(Flowable::paragraph("filler filler filler"));
    }
    d.append(Flowable::heading(1, "Target").with_id("target"));
    d
}

#[test]
fn test_forward_reference_converges_in_two_passes() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut d = forward_ref_document(None);
    let pages = d.run_layout().unwrap();
    assert!(pages >= 2, "the target must land past page 1");
    assert_eq!(d.passes_run(), 2, "pass 2 must match pass 1's table");

    // The emitted reference text is the target's real page number.
    let first_page = d.pages()[0].text();
    assert!(
        first_page.contains(&format!("seepage{pages}")),
        "resolved page number must render, got '{first_page}'"
    );
}

#[test]
fn test_converged_cache_yields_a_single_pass() {
    let path = std::env::temp_dir().join(format!("galley-it-cache-{}.json", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let mut first = forward_ref_document(Some(path.clone()));
    let pages_first = first.run_layout().unwrap();
    assert_eq!(first.passes_run(), 2);

    let mut second = forward_ref_document(Some(path.clone()));
    let pages_second = second.run_layout().unwrap();
    assert_eq!(second.passes_run(), 1, "a warm cache converges immediately");
    assert_eq!(pages_first, pages_second);
    assert_eq!(
        first.pages()[0].text(),
        second.pages()[0].text(),
        "identical output either way"
    );
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_unknown_reference_warns_and_renders_placeholder() {
    let mut d = doc_with(DocumentOptions {
        page: small_page(200.0, 150.0),
        ..Default::default()
    });
    d.append(Flowable::paragraph_spans(vec![
        Span::text("see "),
        Span::page_ref("no-such-id"),
    ]));
    d.run_layout().unwrap();
    assert!(d.pages()[0].text().contains('?'));
    assert!(d
        .warnings()
        .iter()
        .any(|w| w.message.contains("unknown id")));
}

// ─── Footnotes ──────────────────────────────────────────────────

#[test]
fn test_footnote_numbers_assigned_in_first_encounter_order() {
    let mut d = doc_with(DocumentOptions {
        page: small_page(300.0, 300.0),
        ..Default::default()
    });
    d.add_note("second", Flowable::paragraph("betabody"));
    d.add_note("first", Flowable::paragraph("alfabody"));
    d.append(Flowable::paragraph_spans(vec![
        Span::text("intro"),
        Span::note_mark("first"),
        Span::text(" more"),
        Span::note_mark("second"),
        Span::text(" again"),
        Span::note_mark("first"),
    ]));
    d.run_layout().unwrap();

    let text = d.pages()[0].text();
    // Note bodies carry their assigned numbers, in encounter order.
    let one = text.find("1.alfabody").expect("first note placed once");
    let two = text.find("2.betabody").expect("second note placed once");
    assert!(one < two);
    // A repeated reference does not re-place or re-number.
    assert_eq!(text.matches("alfabody").count(), 1);
}

#[test]
fn test_marker_for_unknown_note_warns_and_continues() {
    let mut d = doc_with(DocumentOptions {
        page: small_page(200.0, 150.0),
        ..Default::default()
    });
    d.append(Flowable::paragraph_spans(vec![
        Span::text("text"),
        Span::note_mark("ghost"),
    ]));
    d.run_layout().unwrap();
    assert!(d
        .warnings()
        .iter()
        .any(|w| w.message.contains("unknown note")));
}

// ─── Floats ─────────────────────────────────────────────────────

#[test]
fn test_float_lands_in_the_float_region_once() {
    let mut d = doc_with(DocumentOptions {
        page: small_page(300.0, 250.0),
        ..Default::default()
    });
    d.append(Flowable::paragraph("bodytext bodytext"));
    d.append(Flowable::float(Flowable::paragraph("floated")));
    d.append(Flowable::paragraph("moretext moretext"));
    d.run_layout().unwrap();

    let text = d.pages()[0].text();
    // The float region is composited before the body columns.
    assert!(text.starts_with("floated"), "got '{text}'");
    assert_eq!(text.matches("floated").count(), 1, "placed exactly once");
    assert!(text.contains("bodytext"));
    assert!(text.contains("moretext"));
}

// ─── Keep-together groups ───────────────────────────────────────

#[test]
fn test_keep_together_group_moves_whole_to_the_next_page() {
    let mut d = doc_with(DocumentOptions {
        page: small_page(200.0, 120.0),
        ..Default::default()
    });
    // Fill most of page 1.
    d.append(Flowable::paragraph(&"fill ".repeat(40)));
    let keep = StyleDecl::inline(Style { keep_together: Some(true), ..Default::default() });
    d.append(
        Flowable::group(vec![
            Flowable::paragraph("kept one"),
            Flowable::paragraph("kept two"),
            Flowable::paragraph("kept three"),
        ])
        .with_style(keep),
    );
    let pages = d.run_layout().unwrap();
    assert!(pages >= 2);
    assert!(
        !d.pages()[0].text().contains("kept"),
        "the group must not straddle the boundary"
    );
    assert!(d.pages()[1].text().contains("keptone"));
    assert!(d.pages()[1].text().contains("keptthree"));
}

#[test]
fn test_keep_with_next_moves_a_bottom_heading_over() {
    let mut d = doc_with(DocumentOptions {
        page: small_page(200.0, 120.0),
        ..Default::default()
    });
    // Leave just enough room for the heading line but not its paragraph.
    d.append(Flowable::paragraph(&"fill ".repeat(40)));
    let keep = StyleDecl::inline(Style { keep_with_next: Some(true), ..Default::default() });
    d.append(Flowable::heading(1, "Title").with_style(keep));
    d.append(Flowable::paragraph("body body"));
    let pages = d.run_layout().unwrap();
    assert!(pages >= 2);
    assert!(
        !d.pages()[0].text().contains("Title"),
        "the heading must not be orphaned at the page bottom"
    );
    let second = d.pages()[1].text();
    assert!(second.contains("Title"));
    assert!(second.contains("bodybody"));
}

// ─── Tables ─────────────────────────────────────────────────────

#[test]
fn test_table_header_repeats_after_a_break() {
    let mut rows = vec![vec![
        Flowable::paragraph("HeadA"),
        Flowable::paragraph("HeadB"),
    ]];
    for i in 0..20 {
        rows.push(vec![
            Flowable::paragraph(&format!("ra{i}")),
            Flowable::paragraph(&format!("rb{i}")),
        ]);
    }
    let mut d = doc_with(DocumentOptions {
        page: small_page(250.0, 160.0),
        ..Default::default()
    });
    d.append(Flowable::table(vec![0.5, 0.5], 1, rows));
    let pages = d.run_layout().unwrap();
    assert!(pages >= 2, "twenty rows cannot fit one 140pt page");
    for page in d.pages() {
        assert!(
            page.text().contains("HeadA"),
            "header must repeat on page {}",
            page.number
        );
    }
}

// ─── Multi-column flow ──────────────────────────────────────────

#[test]
fn test_two_columns_hold_more_than_one() {
    let long_text =
        "words words words words words words words words words words words words words";
    let single = {
        let mut d = doc_with(DocumentOptions {
            page: small_page(220.0, 120.0),
            ..Default::default()
        });
        for _ in 0..6 {
            d.append(Flowable::paragraph(long_text));
        }
        d.run_layout().unwrap()
    };
    let double = {
        let mut d = doc_with(DocumentOptions {
            page: PageOptions { columns: 2, ..small_page(220.0, 120.0) },
            ..Default::default()
        });
        for _ in 0..6 {
            d.append(Flowable::paragraph(long_text));
        }
        d.run_layout().unwrap()
    };
    assert!(
        double <= single,
        "two columns ({double} pages) cannot need more pages than one ({single})"
    );
}

// ─── Table of contents ──────────────────────────────────────────

#[test]
fn test_toc_entries_resolve_page_numbers_after_convergence() {
    let mut d = doc_with(DocumentOptions {
        page: small_page(220.0, 150.0),
        ..Default::default()
    });
    d.append(Flowable::table_of_contents(3));
    d.append(Flowable::page_break());
    d.append(Flowable::heading(1, "Alpha"));
    for _ in 0..10 {
        d.append(Flowable::paragraph("body body body"));
    }
    d.append(Flowable::heading(1, "Omega"));
    let pages = d.run_layout().unwrap();
    assert!(pages >= 2);

    let toc = d.pages()[0].text();
    assert!(toc.contains("Alpha"));
    assert!(toc.contains("Omega"));
    assert!(toc.contains('.'), "dotted leaders expected");
    assert!(toc.contains('2'), "a resolved page number expected");
}

// ─── Page furniture and breaks ──────────────────────────────────

#[test]
fn test_footer_template_expands_page_numbers() {
    let mut d = doc_with(DocumentOptions {
        page: PageOptions {
            footer: Some("page {page}".to_string()),
            ..small_page(200.0, 120.0)
        },
        ..Default::default()
    });
    d.append(Flowable::paragraph("one"));
    d.append(Flowable::page_break());
    d.append(Flowable::paragraph("two"));
    let pages = d.run_layout().unwrap();
    assert_eq!(pages, 2);
    assert!(d.pages()[0].text().contains("page1"));
    assert!(d.pages()[1].text().contains("page2"));
}

#[test]
fn test_empty_document_produces_no_pages() {
    let mut d = doc_with(DocumentOptions::default());
    let pages = d.run_layout().unwrap();
    assert_eq!(pages, 0);
    assert!(d.pages().is_empty());
}

// ─── Error taxonomy ─────────────────────────────────────────────

#[test]
fn test_missing_style_value_everywhere_is_fatal() {
    let mut d = Document::new(
        StyleSheet::empty(),
        Box::new(FixedAdvanceFont::new()),
        DocumentOptions::default(),
    );
    d.append(Flowable::paragraph("text"));
    match d.run_layout() {
        Err(Fatal::UnresolvedStyle { .. }) => {}
        other => panic!("expected UnresolvedStyle, got {other:?}"),
    }
}

#[test]
fn test_backend_emission_after_convergence() {
    let mut d = doc_with(DocumentOptions {
        page: small_page(200.0, 150.0),
        ..Default::default()
    });
    d.append(Flowable::paragraph("hello world"));
    let mut backend = RecordingBackend::new();
    let pages = galley::render(&mut d, &mut backend).unwrap();
    assert_eq!(pages, 1);
    assert_eq!(backend.pages.len(), 1);
    assert!(backend.pages[0].text().contains("helloworld"));
}

// ─── Lists and definition lists ─────────────────────────────────

#[test]
fn test_ordered_list_labels_and_content() {
    let mut d = doc_with(DocumentOptions {
        page: small_page(250.0, 200.0),
        ..Default::default()
    });
    d.append(Flowable::list(
        true,
        vec![
            vec![Flowable::paragraph("first item")],
            vec![Flowable::paragraph("second item")],
        ],
    ));
    d.run_layout().unwrap();
    let text = d.pages()[0].text();
    assert!(text.contains("1."));
    assert!(text.contains("2."));
    assert!(text.contains("firstitem"));
    assert!(text.contains("seconditem"));
}

#[test]
fn test_definition_list_renders_terms_and_bodies() {
    let mut d = doc_with(DocumentOptions {
        page: small_page(250.0, 200.0),
        ..Default::default()
    });
    d.append(Flowable::definition_list(vec![
        (
            vec![Span::text("term")],
            vec![Flowable::paragraph("its definition")],
        ),
    ]));
    d.run_layout().unwrap();
    let text = d.pages()[0].text();
    assert!(text.contains("term"));
    assert!(text.contains("itsdefinition"));
}
