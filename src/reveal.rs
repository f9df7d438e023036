//! Word-by-word typewriter for Steve's lines, plus the user's live text.

use log::debug;

pub const WORD_REVEAL_MS: u64 = 200;
pub const COMMA_PAUSE_MS: u64 = 300;
pub const PERIOD_PAUSE_MS: u64 = 600;
pub const ELLIPSIS_DOT_PAUSE_MS: u64 = 600;

pub const ELLIPSIS: &str = "...";
const ELLIPSIS_DOTS: u8 = 3;

/// Splits a line into reveal words, isolating every literal `...` so it plays
/// as a timed three-dot animation instead of one word.
pub fn tokenize(text: &str) -> Vec<String> {
    text.replace(ELLIPSIS, " ... ")
        .split_whitespace()
        .map(str::to_owned)
        .collect()
}

/// Extra pause after a word, on top of [`WORD_REVEAL_MS`].
pub fn punctuation_pause_ms(word: &str) -> u64 {
    if word.ends_with(',') {
        COMMA_PAUSE_MS
    } else if word.ends_with('.') || word.ends_with('!') || word.ends_with('?') {
        PERIOD_PAUSE_MS
    } else {
        0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct EllipsisState {
    active: bool,
    dots_revealed: u8,
}

/// Reveal state for one line. `T` is the continuation handed back once the
/// last word is shown.
#[derive(Debug)]
pub struct TextReveal<T> {
    full_text: String,
    words: Vec<String>,
    displayed: String,
    cursor: usize,
    /// `None` until the first advance after `set_text` arms it.
    next_deadline_ms: Option<u64>,
    ellipsis: EllipsisState,
    speaking: bool,
    on_complete: Option<T>,
    user_text: String,
}

impl<T> TextReveal<T> {
    pub fn new() -> Self {
        Self {
            full_text: String::new(),
            words: Vec::new(),
            displayed: String::new(),
            cursor: 0,
            next_deadline_ms: None,
            ellipsis: EllipsisState::default(),
            speaking: false,
            on_complete: None,
            user_text: String::new(),
        }
    }

    /// Replaces the line being revealed.
    ///
    /// Returns `on_complete` back when the line has no words: nothing will be
    /// revealed, so the continuation would otherwise never run.
    pub fn set_text(&mut self, text: &str, on_complete: Option<T>) -> Option<T> {
        self.full_text = text.to_owned();
        self.words = tokenize(text);
        self.displayed.clear();
        self.cursor = 0;
        self.next_deadline_ms = None;
        self.ellipsis = EllipsisState::default();
        self.on_complete = None;

        if self.words.is_empty() {
            self.speaking = false;
            return on_complete;
        }
        self.speaking = true;
        self.on_complete = on_complete;
        None
    }

    /// Reveals whatever is due at `now_ms`. Returns the continuation on the
    /// call that reveals the last word, and never again for this line.
    pub fn advance(&mut self, now_ms: u64) -> Option<T> {
        if !self.speaking {
            return None;
        }
        let Some(deadline) = self.next_deadline_ms else {
            self.next_deadline_ms = Some(now_ms + WORD_REVEAL_MS);
            return None;
        };

        if self.cursor < self.words.len() && now_ms > deadline {
            if self.words[self.cursor] == ELLIPSIS {
                self.advance_ellipsis(now_ms);
            } else {
                let word = &self.words[self.cursor];
                let delay = WORD_REVEAL_MS + punctuation_pause_ms(word);
                self.displayed = self.words[..=self.cursor].join(" ");
                self.next_deadline_ms = Some(now_ms + delay);
                self.cursor += 1;
            }
        }

        if self.cursor >= self.words.len() {
            self.speaking = false;
            let completion = self.on_complete.take();
            if completion.is_some() {
                debug!("reveal: finished \"{}\"", self.full_text);
            }
            return completion;
        }
        None
    }

    fn advance_ellipsis(&mut self, now_ms: u64) {
        if !self.ellipsis.active {
            self.ellipsis = EllipsisState {
                active: true,
                dots_revealed: 0,
            };
            if !self.displayed.is_empty() {
                self.displayed.push(' ');
            }
        }

        if self.ellipsis.dots_revealed < ELLIPSIS_DOTS {
            self.displayed.push('.');
            self.ellipsis.dots_revealed += 1;
            self.next_deadline_ms = Some(now_ms + ELLIPSIS_DOT_PAUSE_MS);
        }
        if self.ellipsis.dots_revealed >= ELLIPSIS_DOTS {
            self.ellipsis.active = false;
            self.cursor += 1;
            self.next_deadline_ms = Some(now_ms + WORD_REVEAL_MS);
        }
    }

    pub fn set_user_text(&mut self, text: &str) {
        self.user_text.clear();
        self.user_text.push_str(text);
    }

    pub fn user_text(&self) -> &str {
        &self.user_text
    }

    /// The part of Steve's line revealed so far.
    pub fn displayed(&self) -> &str {
        &self.displayed
    }

    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.next_deadline_ms
    }
}

impl<T> Default for TextReveal<T> {
    fn default() -> Self {
        Self::new()
    }
}
