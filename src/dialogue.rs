use log::{debug, info, warn};

pub const LOADING_DELAY_MS: u64 = 1_500;
pub const LOADING_CYCLE_MS: u64 = 2_500;

pub const LOADING_PHRASES: &[&str] = &[
    "Steve is staring at the ceiling...",
    "Steve is thinking it over...",
    "Steve sighs and searches for words...",
    "Steve is still thinking...",
];

/// One key press, as far as the dialogue cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    Char(char),
    Backspace,
    Enter,
    /// Modifiers, arrows, function keys.
    Other,
}

/// What a key press asks of the rest of the stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEffect {
    Ignored,
    /// The input buffer changed; redraw the user's text from it.
    Edited(String),
    /// Enter was pressed; send this text.
    Submit(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyResponse {
    /// Clear the user's side of the display before applying `effect`.
    pub clear_user_display: bool,
    pub effect: KeyEffect,
}

impl KeyResponse {
    const IGNORED: Self = Self {
        clear_user_display: false,
        effect: KeyEffect::Ignored,
    };
}

/// A message cleared to go to the chat service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub generation: u64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadingTiming {
    pub delay_ms: u64,
    pub cycle_ms: u64,
}

impl Default for LoadingTiming {
    fn default() -> Self {
        Self {
            delay_ms: LOADING_DELAY_MS,
            cycle_ms: LOADING_CYCLE_MS,
        }
    }
}

/// Input buffer, dialogue lock, and the single in-flight request slot.
#[derive(Debug, Default)]
pub struct DialogueCoordinator {
    input: String,
    waiting: bool,
    locked: bool,
    clear_on_next_key: bool,
    generation: u64,
    loading_armed_at: Option<u64>,
    loading: LoadingTiming,
}

impl DialogueCoordinator {
    pub fn new(loading: LoadingTiming) -> Self {
        Self {
            loading,
            ..Self::default()
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn clears_on_next_key(&self) -> bool {
        self.clear_on_next_key
    }

    pub fn handle_key(&mut self, key: KeyInput) -> KeyResponse {
        if self.locked {
            return KeyResponse::IGNORED;
        }
        let key = match key {
            KeyInput::Char(ch) if ch.is_control() => KeyInput::Other,
            key => key,
        };

        let mut clear_user_display = false;
        if self.clear_on_next_key {
            if key == KeyInput::Other {
                return KeyResponse::IGNORED;
            }
            self.clear_on_next_key = false;
            clear_user_display = true;
        }

        let effect = match key {
            KeyInput::Enter => KeyEffect::Submit(self.input.clone()),
            KeyInput::Backspace => {
                self.input.pop();
                KeyEffect::Edited(self.input.clone())
            }
            KeyInput::Char(ch) => {
                self.input.push(ch);
                KeyEffect::Edited(self.input.clone())
            }
            KeyInput::Other => KeyEffect::Ignored,
        };

        KeyResponse {
            clear_user_display,
            effect,
        }
    }

    /// Takes the lock for one round trip. Returns `None`, changing nothing,
    /// for blank text or while a reply is still outstanding.
    pub fn begin_send(&mut self, text: &str, now_ms: u64) -> Option<PendingRequest> {
        if text.trim().is_empty() {
            return None;
        }
        if self.waiting {
            warn!("dialogue: send rejected, still waiting on generation {}", self.generation);
            return None;
        }

        self.generation += 1;
        self.locked = true;
        self.waiting = true;
        self.input.clear();
        self.loading_armed_at = Some(now_ms);
        info!("dialogue: sending generation {}", self.generation);

        Some(PendingRequest {
            generation: self.generation,
            message: text.to_owned(),
        })
    }

    /// Releases the waiting slot for `generation`. Returns false, changing
    /// nothing, for a reply that does not belong to the outstanding request.
    pub fn finish(&mut self, generation: u64) -> bool {
        if !self.waiting || generation != self.generation {
            warn!(
                "dialogue: dropping stale reply for generation {generation} (current {}, waiting {})",
                self.generation, self.waiting
            );
            return false;
        }
        self.waiting = false;
        self.loading_armed_at = None;
        debug!("dialogue: generation {generation} finished");
        true
    }

    /// Reopens input once Steve is done; the next real key wipes the user's
    /// previous line.
    pub fn unlock(&mut self) {
        self.locked = false;
        self.clear_on_next_key = true;
    }

    /// Status phrase to show while a slow reply is pending.
    pub fn loading_status(&self, now_ms: u64) -> Option<&'static str> {
        let armed_at = self.loading_armed_at?;
        let elapsed = now_ms.saturating_sub(armed_at);
        if elapsed < self.loading.delay_ms {
            return None;
        }
        let cycle = self.loading.cycle_ms.max(1);
        let index = ((elapsed - self.loading.delay_ms) / cycle) as usize % LOADING_PHRASES.len();
        Some(LOADING_PHRASES[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_text(dialogue: &mut DialogueCoordinator, text: &str) {
        for ch in text.chars() {
            dialogue.handle_key(KeyInput::Char(ch));
        }
    }

    #[test]
    fn typing_edits_buffer_and_enter_submits_it() {
        let mut dialogue = DialogueCoordinator::default();
        type_text(&mut dialogue, "hix");
        let response = dialogue.handle_key(KeyInput::Backspace);
        assert_eq!(response.effect, KeyEffect::Edited("hi".to_owned()));
        assert!(!response.clear_user_display);

        let response = dialogue.handle_key(KeyInput::Enter);
        assert_eq!(response.effect, KeyEffect::Submit("hi".to_owned()));
        assert_eq!(dialogue.input(), "hi");
    }

    #[test]
    fn modifier_and_control_keys_do_not_edit() {
        let mut dialogue = DialogueCoordinator::default();
        assert_eq!(dialogue.handle_key(KeyInput::Other).effect, KeyEffect::Ignored);
        assert_eq!(dialogue.handle_key(KeyInput::Char('\t')).effect, KeyEffect::Ignored);
        assert_eq!(dialogue.input(), "");
    }

    #[test]
    fn send_locks_clears_buffer_and_rejects_reentry() {
        let mut dialogue = DialogueCoordinator::default();
        type_text(&mut dialogue, "hello");
        let request = dialogue.begin_send("hello", 0).expect("request");
        assert_eq!(request.generation, 1);
        assert!(dialogue.is_locked());
        assert!(dialogue.is_waiting());
        assert_eq!(dialogue.input(), "");

        assert_eq!(dialogue.begin_send("again", 10), None);
        assert_eq!(dialogue.input(), "");
        assert!(dialogue.finish(1));
        assert!(!dialogue.is_waiting());
    }

    #[test]
    fn blank_send_is_ignored() {
        let mut dialogue = DialogueCoordinator::default();
        assert_eq!(dialogue.begin_send("  \t ", 0), None);
        assert!(!dialogue.is_locked());
        assert!(!dialogue.is_waiting());
    }

    #[test]
    fn locked_dialogue_ignores_every_key() {
        let mut dialogue = DialogueCoordinator::default();
        dialogue.begin_send("hello", 0).expect("request");
        for key in [
            KeyInput::Char('a'),
            KeyInput::Backspace,
            KeyInput::Enter,
            KeyInput::Other,
        ] {
            assert_eq!(dialogue.handle_key(key), KeyResponse::IGNORED);
        }
        assert_eq!(dialogue.input(), "");
    }

    #[test]
    fn first_real_key_after_unlock_clears_user_display() {
        let mut dialogue = DialogueCoordinator::default();
        dialogue.begin_send("hello", 0).expect("request");
        dialogue.finish(1);
        dialogue.unlock();

        assert_eq!(dialogue.handle_key(KeyInput::Other), KeyResponse::IGNORED);
        assert!(dialogue.clears_on_next_key());

        let response = dialogue.handle_key(KeyInput::Char('o'));
        assert!(response.clear_user_display);
        assert_eq!(response.effect, KeyEffect::Edited("o".to_owned()));

        let response = dialogue.handle_key(KeyInput::Char('k'));
        assert!(!response.clear_user_display);
    }

    #[test]
    fn stale_generation_is_refused() {
        let mut dialogue = DialogueCoordinator::default();
        dialogue.begin_send("one", 0).expect("request");
        assert!(!dialogue.finish(7));
        assert!(dialogue.is_waiting());
        assert!(dialogue.finish(1));
        assert!(!dialogue.finish(1));
    }

    #[test]
    fn loading_status_appears_after_delay_and_rotates() {
        let mut dialogue = DialogueCoordinator::default();
        dialogue.begin_send("hm", 1_000).expect("request");
        assert_eq!(dialogue.loading_status(2_499), None);
        assert_eq!(dialogue.loading_status(2_500), Some(LOADING_PHRASES[0]));
        assert_eq!(dialogue.loading_status(4_999), Some(LOADING_PHRASES[0]));
        assert_eq!(dialogue.loading_status(5_000), Some(LOADING_PHRASES[1]));
        assert_eq!(
            dialogue.loading_status(2_500 + 2_500 * LOADING_PHRASES.len() as u64),
            Some(LOADING_PHRASES[0])
        );

        dialogue.finish(1);
        assert_eq!(dialogue.loading_status(60_000), None);
    }
}
