//! # References, Counters, and Footnotes
//!
//! The document-wide identifier, numbering, and page-reference tables.
//! Entries and formatted numbers are written once during prepare and
//! read-only during layout. Page numbers, float placements, and footnote
//! numbering are layout-time state, reset at the start of every pass so
//! nothing leaks between passes.
//!
//! A page number becomes authoritative only after the page carrying the
//! element has been fully placed: placements queue as pending and commit
//! when the page finishes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Fatal;

/// What a reference span shows about its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefKind {
    /// The target's formatted number ("2.3", "Figure 4").
    Number,
    /// The target's title text.
    Title,
    /// The page the target landed on in the previous pass.
    Page,
}

/// A pluggable numbering scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NumberFormat {
    Arabic,
    LowerRoman,
    UpperRoman,
    LowerAlpha,
    UpperAlpha,
    /// Cycle through the symbols, doubling on each full cycle
    /// (*, †, ‡, then **, ††, …).
    Symbol(Vec<char>),
}

impl NumberFormat {
    pub fn format(&self, n: usize) -> String {
        debug_assert!(n >= 1, "numbering starts at 1");
        let n = n.max(1);
        match self {
            NumberFormat::Arabic => n.to_string(),
            NumberFormat::LowerRoman => roman(n).to_lowercase(),
            NumberFormat::UpperRoman => roman(n),
            NumberFormat::LowerAlpha => alpha(n),
            NumberFormat::UpperAlpha => alpha(n).to_uppercase(),
            NumberFormat::Symbol(symbols) => {
                if symbols.is_empty() {
                    return n.to_string();
                }
                let index = (n - 1) % symbols.len();
                let repeat = (n - 1) / symbols.len() + 1;
                symbols[index].to_string().repeat(repeat)
            }
        }
    }
}

fn roman(mut n: usize) -> String {
    const TABLE: [(usize, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut out = String::new();
    for (value, digits) in TABLE {
        while n >= value {
            out.push_str(digits);
            n -= value;
        }
    }
    out
}

/// Bijective base-26: a..z, aa, ab, …
fn alpha(mut n: usize) -> String {
    let mut out = Vec::new();
    while n > 0 {
        n -= 1;
        out.push((b'a' + (n % 26) as u8) as char);
        n /= 26;
    }
    out.into_iter().rev().collect()
}

/// Nested heading numbering: advancing a level resets the deeper ones, and
/// the formatted number carries the parent prefix ("2.3.1").
#[derive(Debug, Clone)]
pub struct HeadingCounters {
    counts: Vec<usize>,
    formats: Vec<NumberFormat>,
}

impl HeadingCounters {
    pub fn new(formats: Vec<NumberFormat>) -> Self {
        HeadingCounters { counts: Vec::new(), formats }
    }

    pub fn advance(&mut self, level: u8) -> String {
        let level = level.max(1) as usize;
        if self.counts.len() < level {
            self.counts.resize(level, 0);
        }
        self.counts[level - 1] += 1;
        self.counts.truncate(level);
        (0..level)
            .map(|i| {
                self.formats
                    .get(i)
                    .unwrap_or(&NumberFormat::Arabic)
                    .format(self.counts[i])
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl Default for HeadingCounters {
    fn default() -> Self {
        HeadingCounters::new(Vec::new())
    }
}

/// Prepare-time data for one referenceable element.
#[derive(Debug, Clone, Default)]
pub struct RefEntry {
    pub number: String,
    pub title: String,
}

/// A heading registered for the table of contents.
#[derive(Debug, Clone)]
pub struct TocEntry {
    pub id: String,
    pub level: u8,
    pub number: String,
    pub title: String,
}

/// Layout-mutable parts of the store, captured for page-scoped rollback.
/// Float placements are deliberately excluded: a placed float stays placed
/// across the page's re-renders.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pending: Vec<(String, usize)>,
    footnote_numbers: HashMap<String, usize>,
    next_footnote: usize,
    placed_footnotes: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct ReferenceStore {
    entries: HashMap<String, RefEntry>,
    toc: Vec<TocEntry>,
    pages: HashMap<String, usize>,
    pending: Vec<(String, usize)>,
    footnote_numbers: HashMap<String, usize>,
    next_footnote: usize,
    placed_footnotes: HashSet<String>,
    placed_floats: HashSet<String>,
}

impl ReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Prepare-time registration ───────────────────────────────

    pub fn register(&mut self, id: &str, number: String, title: String) {
        self.entries.insert(id.to_string(), RefEntry { number, title });
    }

    pub fn register_heading(&mut self, id: &str, level: u8, number: String, title: String) {
        self.register(id, number.clone(), title.clone());
        self.toc.push(TocEntry { id: id.to_string(), level, number, title });
    }

    pub fn known(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn formatted_number(&self, id: &str) -> Option<String> {
        self.entries
            .get(id)
            .map(|e| e.number.clone())
            .filter(|n| !n.is_empty())
    }

    pub fn title(&self, id: &str) -> Option<String> {
        self.entries.get(id).map(|e| e.title.clone())
    }

    pub fn toc_entries(&self, levels: u8) -> Vec<TocEntry> {
        self.toc
            .iter()
            .filter(|e| e.level <= levels)
            .cloned()
            .collect()
    }

    // ── Page numbers ────────────────────────────────────────────

    /// Queue a first-encounter placement; it commits when the page does.
    pub fn note_placement(&mut self, id: &str, page: usize) {
        if self.pages.contains_key(id) || self.pending.iter().any(|(p, _)| p == id) {
            return;
        }
        self.pending.push((id.to_string(), page));
    }

    /// The page carrying the pending placements has been fully placed.
    pub fn commit_page(&mut self) {
        for (id, page) in self.pending.drain(..) {
            self.pages.entry(id).or_insert(page);
        }
    }

    pub fn page_of(&self, id: &str) -> Option<usize> {
        self.pages.get(id).copied()
    }

    /// The converged id → page table, in a stable order.
    pub fn page_table(&self) -> BTreeMap<String, usize> {
        self.pages.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    // ── Footnotes ───────────────────────────────────────────────

    /// The note's number, assigned at first encounter, strictly
    /// increasing from 1, stable on re-encounter.
    pub fn footnote_number(&mut self, note: &str) -> usize {
        if let Some(&n) = self.footnote_numbers.get(note) {
            return n;
        }
        self.next_footnote += 1;
        self.footnote_numbers.insert(note.to_string(), self.next_footnote);
        self.next_footnote
    }

    pub fn is_footnote_placed(&self, note: &str) -> bool {
        self.placed_footnotes.contains(note)
    }

    pub fn mark_footnote_placed(&mut self, note: &str) {
        self.placed_footnotes.insert(note.to_string());
    }

    // ── Floats ──────────────────────────────────────────────────

    pub fn is_float_placed(&self, id: &str) -> bool {
        self.placed_floats.contains(id)
    }

    pub fn place_float(&mut self, id: &str) {
        self.placed_floats.insert(id.to_string());
    }

    // ── Pass and page lifecycle ─────────────────────────────────

    /// Clear everything layout-mutable at the start of a full pass.
    pub fn reset_pass(&mut self) {
        self.pages.clear();
        self.pending.clear();
        self.footnote_numbers.clear();
        self.next_footnote = 0;
        self.placed_footnotes.clear();
        self.placed_floats.clear();
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            pending: self.pending.clone(),
            footnote_numbers: self.footnote_numbers.clone(),
            next_footnote: self.next_footnote,
            placed_footnotes: self.placed_footnotes.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: StoreSnapshot) {
        self.pending = snapshot.pending;
        self.footnote_numbers = snapshot.footnote_numbers;
        self.next_footnote = snapshot.next_footnote;
        self.placed_footnotes = snapshot.placed_footnotes;
    }
}

// ─── Persisted cache ────────────────────────────────────────────

/// The opaque artifact persisted between compiler invocations: the page
/// count and the id → page table of the last converged pass. Only the
/// round trip is contractual.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceCache {
    pub page_count: usize,
    pub pages: BTreeMap<String, usize>,
}

impl ReferenceCache {
    /// Load a cache if one exists. A malformed cache is ignored with a
    /// warning — it only costs an extra pass.
    pub fn load(path: &Path) -> Result<Option<Self>, Fatal> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Fatal::CacheIo(e)),
        };
        match serde_json::from_str(&text) {
            Ok(cache) => Ok(Some(cache)),
            Err(e) => {
                log::warn!("ignoring malformed reference cache at {}: {e}", path.display());
                Ok(None)
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), Fatal> {
        let text = serde_json::to_string(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_formats() {
        assert_eq!(NumberFormat::Arabic.format(12), "12");
        assert_eq!(NumberFormat::LowerRoman.format(4), "iv");
        assert_eq!(NumberFormat::UpperRoman.format(1994), "MCMXCIV");
        assert_eq!(NumberFormat::LowerAlpha.format(1), "a");
        assert_eq!(NumberFormat::LowerAlpha.format(27), "aa");
        assert_eq!(NumberFormat::UpperAlpha.format(2), "B");
        let sym = NumberFormat::Symbol(vec!['*', '†']);
        assert_eq!(sym.format(1), "*");
        assert_eq!(sym.format(2), "†");
        assert_eq!(sym.format(3), "**");
        assert_eq!(sym.format(4), "††");
    }

    #[test]
    fn test_heading_counters_nest_and_reset() {
        let mut counters = HeadingCounters::default();
        assert_eq!(counters.advance(1), "1");
        assert_eq!(counters.advance(2), "1.1");
        assert_eq!(counters.advance(2), "1.2");
        assert_eq!(counters.advance(3), "1.2.1");
        assert_eq!(counters.advance(1), "2");
        // Deeper levels reset when a shallower one advances.
        assert_eq!(counters.advance(2), "2.1");
    }

    #[test]
    fn test_footnote_numbers_are_monotonic_and_stable() {
        let mut store = ReferenceStore::new();
        assert_eq!(store.footnote_number("a"), 1);
        assert_eq!(store.footnote_number("b"), 2);
        assert_eq!(store.footnote_number("a"), 1);
        assert_eq!(store.footnote_number("c"), 3);
    }

    #[test]
    fn test_placement_commits_only_with_the_page() {
        let mut store = ReferenceStore::new();
        store.note_placement("sec", 3);
        assert_eq!(store.page_of("sec"), None);
        store.commit_page();
        assert_eq!(store.page_of("sec"), Some(3));
        // First placement wins.
        store.note_placement("sec", 9);
        store.commit_page();
        assert_eq!(store.page_of("sec"), Some(3));
    }

    #[test]
    fn test_snapshot_restores_footnotes_but_not_floats() {
        let mut store = ReferenceStore::new();
        let snapshot = store.snapshot();
        store.footnote_number("a");
        store.mark_footnote_placed("a");
        store.place_float("fig");
        store.restore(snapshot);
        assert!(!store.is_footnote_placed("a"));
        assert_eq!(store.footnote_number("b"), 1);
        assert!(store.is_float_placed("fig"));
    }

    #[test]
    fn test_reset_pass_clears_layout_state() {
        let mut store = ReferenceStore::new();
        store.register("h", "1".into(), "Intro".into());
        store.note_placement("h", 1);
        store.commit_page();
        store.footnote_number("n");
        store.place_float("f");
        store.reset_pass();
        assert_eq!(store.page_of("h"), None);
        assert!(!store.is_float_placed("f"));
        assert_eq!(store.footnote_number("n2"), 1);
        // Prepare-time entries survive.
        assert!(store.known("h"));
    }

    #[test]
    fn test_cache_round_trip() {
        let dir = std::env::temp_dir().join("galley-cache-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("refs.json");
        let mut cache = ReferenceCache { page_count: 7, pages: BTreeMap::new() };
        cache.pages.insert("sec-1".into(), 2);
        cache.save(&path).unwrap();
        let loaded = ReferenceCache::load(&path).unwrap().unwrap();
        assert_eq!(loaded, cache);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_cache_missing_file_is_none() {
        let path = std::env::temp_dir().join("galley-no-such-cache.json");
        assert!(ReferenceCache::load(&path).unwrap().is_none());
    }
}
