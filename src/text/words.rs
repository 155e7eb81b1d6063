//! Word-level tokenization of styled runs.
//!
//! The paragraph engine consumes tokens, not characters: a maximal run of
//! non-whitespace, a single space, a tab, or an explicit newline. Iteration
//! position is an explicit, copyable [`WordCursor`] — a paragraph that
//! overflows mid-stream stores its cursor and resumes from it in the next
//! container, without any hidden iterator state.
//!
//! Long non-whitespace runs are additionally split at UAX#14 allowed break
//! opportunities ("self-contained" may break after the hyphen, URLs after
//! slashes), so those candidates reach the line builder as separate words.

use unicode_linebreak::{linebreaks, BreakOpportunity};

use crate::font::FontSpec;

/// One styled run of inline text, already resolved against the cascade.
#[derive(Debug, Clone)]
pub struct InlineRun {
    pub text: String,
    pub font: FontSpec,
    /// Set when this run is a footnote marker; the note body is placed
    /// when the line carrying the marker commits.
    pub note: Option<String>,
}

/// Position within a paragraph's runs: `(run index, char offset)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct WordCursor {
    pub run: usize,
    pub offset: usize,
}

/// A word token: the text plus the run it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub text: String,
    pub run: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(Word),
    Space { run: usize },
    Tab { run: usize },
    Newline,
}

/// Break opportunities *before* each char position, mapping UAX#14 byte
/// offsets onto char indices. Index 0 is never a break.
fn break_before(text: &str) -> Vec<bool> {
    let char_count = text.chars().count();
    let mut result = vec![false; char_count];
    let byte_to_char: Vec<usize> = {
        let mut map = vec![0usize; text.len() + 1];
        let mut char_idx = 0;
        for (byte_idx, _) in text.char_indices() {
            map[byte_idx] = char_idx;
            char_idx += 1;
        }
        map[text.len()] = char_idx;
        map
    };
    for (byte_offset, opportunity) in linebreaks(text) {
        if matches!(opportunity, BreakOpportunity::Allowed) {
            let char_idx = byte_to_char[byte_offset];
            if char_idx > 0 && char_idx < char_count {
                result[char_idx] = true;
            }
        }
    }
    result
}

/// Tokenizes a fixed set of runs. Built once per paragraph render; all
/// iteration state lives in the caller's [`WordCursor`].
pub struct WordSource {
    chars: Vec<Vec<char>>,
    breaks: Vec<Vec<bool>>,
}

impl WordSource {
    pub fn new(runs: &[InlineRun]) -> Self {
        WordSource {
            chars: runs.iter().map(|r| r.text.chars().collect()).collect(),
            breaks: runs.iter().map(|r| break_before(&r.text)).collect(),
        }
    }

    /// The token at `cursor`, plus the cursor past it. `None` at the end.
    pub fn next(&self, cursor: WordCursor) -> Option<(Token, WordCursor)> {
        let mut run = cursor.run;
        let mut offset = cursor.offset;
        // Skip exhausted runs.
        while run < self.chars.len() && offset >= self.chars[run].len() {
            run += 1;
            offset = 0;
        }
        if run >= self.chars.len() {
            return None;
        }

        let chars = &self.chars[run];
        let ch = chars[offset];
        let after = |offset| WordCursor { run, offset };

        if ch == '\n' {
            return Some((Token::Newline, after(offset + 1)));
        }
        if ch == '\t' {
            return Some((Token::Tab { run }, after(offset + 1)));
        }
        if ch.is_whitespace() {
            return Some((Token::Space { run }, after(offset + 1)));
        }

        let mut end = offset + 1;
        while end < chars.len() && !chars[end].is_whitespace() {
            if self.breaks[run][end] {
                break;
            }
            end += 1;
        }
        let word = Word { text: chars[offset..end].iter().collect(), run };
        Some((Token::Word(word), after(end)))
    }
}
