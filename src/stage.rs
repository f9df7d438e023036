use log::{info, warn};

use crate::chat::{ChatOutcome, VisualState, FALLBACK_LINE};
use crate::config::RoomConfig;
use crate::dialogue::{DialogueCoordinator, KeyEffect, KeyInput, LoadingTiming, PendingRequest};
use crate::distortion::{Distortion, DistortionFrame};
use crate::reveal::TextReveal;
use crate::textbox::{steve_box, user_box, TextBox, TextMeasure};
use crate::timecodes::{TimecodeTable, BRIGHT, BRIGHT_TO_BLINDING, COLLAPSE, DIM, DIM_TO_BRIGHT, INTRO, MENU};
use crate::timeline::{TickOutcome, TimelineController, TICK_INTERVAL_MS};
use crate::video::VideoPlayback;

/// Aspect ratio of the room video. Narrower viewports get the CRT look.
pub const VIDEO_ASPECT: f32 = 16.0 / 9.0;

/// Continuations parked on Steve's reveal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    UnlockDialogue,
}

/// Observable milestones, drained by the host for logs and transcripts.
#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    Segment(String),
    Held,
    UserSent(String),
    /// Steve finished revealing a line.
    SteveLine(String),
    Blocked(VisualState),
    ReplyFailed(String),
    StaleReply(u64),
    Loading(&'static str),
    Unlocked,
}

#[derive(Debug, Clone)]
pub struct StageSettings {
    pub unmuted_volume: f32,
    pub opening_line: String,
    pub opening_delay_ms: u64,
    pub loading: LoadingTiming,
    pub seed: u64,
}

impl From<&RoomConfig> for StageSettings {
    fn from(config: &RoomConfig) -> Self {
        Self {
            unmuted_volume: config.volume,
            opening_line: config.opening_line.clone(),
            opening_delay_ms: config.opening_delay_ms,
            loading: config.loading_timing(),
            seed: config.seed,
        }
    }
}

impl Default for StageSettings {
    fn default() -> Self {
        Self::from(&RoomConfig::default())
    }
}

/// Everything a host needs to draw one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameView {
    pub frame_index: u64,
    pub segment: Option<String>,
    pub video_time: f64,
    pub distortion: DistortionFrame,
    pub crt: bool,
    pub steve_box: Option<TextBox>,
    pub user_box: Option<TextBox>,
    pub loading: Option<&'static str>,
    pub started: bool,
    pub muted: bool,
}

#[derive(Debug, Clone)]
struct ScheduledLine {
    at_ms: u64,
    text: String,
}

/// Owns the timeline, dialogue, reveal and distortion state of one session.
pub struct Stage<V> {
    timeline: TimelineController<V>,
    dialogue: DialogueCoordinator,
    reveal: TextReveal<Completion>,
    distortion: Distortion,
    settings: StageSettings,
    started: bool,
    crt: bool,
    viewport: (f32, f32),
    next_tick_ms: Option<u64>,
    opening: Option<ScheduledLine>,
    frame_index: u64,
    loading: Option<&'static str>,
    events: Vec<StageEvent>,
}

impl<V: VideoPlayback> Stage<V> {
    pub fn new(table: TimecodeTable, video: V, settings: StageSettings) -> Self {
        Self {
            timeline: TimelineController::new(table, video),
            dialogue: DialogueCoordinator::new(settings.loading),
            reveal: TextReveal::new(),
            distortion: Distortion::new(settings.seed),
            settings,
            started: false,
            crt: false,
            viewport: (1280.0, 720.0),
            next_tick_ms: None,
            opening: None,
            frame_index: 0,
            loading: None,
            events: Vec::new(),
        }
    }

    pub fn timeline(&self) -> &TimelineController<V> {
        &self.timeline
    }

    pub fn video_mut(&mut self) -> &mut V {
        self.timeline.video_mut()
    }

    pub fn dialogue(&self) -> &DialogueCoordinator {
        &self.dialogue
    }

    pub fn reveal(&self) -> &TextReveal<Completion> {
        &self.reveal
    }

    pub fn distortion(&self) -> &Distortion {
        &self.distortion
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn crt(&self) -> bool {
        self.crt
    }

    pub fn drain_events(&mut self) -> Vec<StageEvent> {
        std::mem::take(&mut self.events)
    }

    /// The video is decodable: start the tick cadence behind a silent menu.
    pub fn assets_ready(&mut self, now_ms: u64) {
        info!("stage: assets ready, starting menu loop");
        self.set_crt(false);
        self.next_tick_ms = Some(now_ms + TICK_INTERVAL_MS);
        self.timeline.video_mut().set_volume(0.0);
        self.enter_loop(MENU);
    }

    /// Leaves the menu. Only the first call has any effect.
    pub fn start(&mut self, now_ms: u64) {
        if self.started {
            return;
        }
        self.started = true;
        info!("stage: starting experience");
        let volume = self.settings.unmuted_volume;
        self.timeline.video_mut().set_volume(volume);
        self.play_transition(INTRO);
        self.opening = Some(ScheduledLine {
            at_ms: now_ms + self.settings.opening_delay_ms,
            text: self.settings.opening_line.clone(),
        });
    }

    /// Returns true when the video is now muted.
    pub fn toggle_mute(&mut self) -> bool {
        let video = self.timeline.video_mut();
        if video.volume() > 0.0 {
            video.set_volume(0.0);
            true
        } else {
            video.set_volume(self.settings.unmuted_volume);
            false
        }
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.viewport = (width.max(1.0), height.max(1.0));
        self.check_aspect_ratio();
    }

    fn check_aspect_ratio(&mut self) {
        let (width, height) = self.viewport;
        self.set_crt(width / height < VIDEO_ASPECT);
    }

    fn set_crt(&mut self, active: bool) {
        if self.crt != active {
            self.crt = active;
            info!("stage: CRT effect {}", if active { "on" } else { "off" });
        }
    }

    /// Runs every timeline tick that is due by `now_ms`.
    pub fn run_due_ticks(&mut self, now_ms: u64) {
        while let Some(due) = self.next_tick_ms {
            if due > now_ms {
                break;
            }
            self.tick();
            self.next_tick_ms = Some(due + TICK_INTERVAL_MS);
        }
    }

    pub fn tick(&mut self) -> TickOutcome {
        let outcome = self.timeline.tick();
        match &outcome {
            TickOutcome::SafetyNet => self.events.push(StageEvent::Segment(DIM.to_owned())),
            TickOutcome::Advanced(name) => self.events.push(StageEvent::Segment(name.clone())),
            TickOutcome::Held => self.events.push(StageEvent::Held),
            TickOutcome::Idle | TickOutcome::Steady | TickOutcome::Reseeked => {}
        }
        outcome
    }

    /// Feeds one key press. Returns a request when the key sent a message.
    pub fn key(&mut self, key: KeyInput, now_ms: u64) -> Option<PendingRequest> {
        if !self.started {
            return None;
        }

        let response = self.dialogue.handle_key(key);
        if response.clear_user_display {
            self.reveal.set_user_text("");
        }
        match response.effect {
            KeyEffect::Ignored => None,
            KeyEffect::Edited(text) => {
                self.reveal.set_user_text(&text);
                None
            }
            KeyEffect::Submit(text) => self.send_message(&text, now_ms),
        }
    }

    /// Starts a round trip for `text`, or returns `None` when the text is
    /// blank or a reply is still outstanding.
    pub fn send_message(&mut self, text: &str, now_ms: u64) -> Option<PendingRequest> {
        let request = self.dialogue.begin_send(text, now_ms)?;

        self.distortion.observe_message(text);
        self.opening = None;
        self.loading = None;
        self.reveal.set_text("...", None);
        self.events.push(StageEvent::UserSent(text.to_owned()));
        Some(request)
    }

    pub fn deliver(&mut self, outcome: ChatOutcome) {
        if !self.dialogue.finish(outcome.generation) {
            self.events.push(StageEvent::StaleReply(outcome.generation));
            return;
        }
        self.loading = None;

        match outcome.result {
            Ok(reply) => {
                info!(
                    "stage: reply for generation {} ({})",
                    outcome.generation,
                    reply.visual_state.keyword()
                );
                let unused = self
                    .reveal
                    .set_text(&reply.dialogue, Some(Completion::UnlockDialogue));
                if let Some(completion) = unused {
                    self.complete(completion);
                }
                self.apply_visual_state(reply.visual_state);
            }
            Err(error) => {
                warn!("stage: chat round trip failed: {error:#}");
                self.reveal.set_text(FALLBACK_LINE, None);
                self.unlock_dialogue();
                self.events.push(StageEvent::ReplyFailed(format!("{error:#}")));
            }
        }
    }

    /// Picks the transition for Steve's new mood, after distortion has had
    /// its say.
    pub fn apply_visual_state(&mut self, requested: VisualState) {
        let Some(visual_state) = self.distortion.gate(requested) else {
            self.events.push(StageEvent::Blocked(requested));
            return;
        };

        let in_bright = self.timeline.current_name() == Some(BRIGHT);
        match visual_state {
            VisualState::Dark => {
                self.check_aspect_ratio();
                if in_bright {
                    self.play_transition(BRIGHT_TO_BLINDING);
                } else {
                    self.play_transition(COLLAPSE);
                }
            }
            VisualState::Bright if !in_bright => self.play_transition(DIM_TO_BRIGHT),
            VisualState::Considering => info!("stage: Steve is considering"),
            VisualState::Bright | VisualState::Dim | VisualState::Other => {}
        }
    }

    /// Per-frame update: opening line, reveal pacing, render parameters.
    pub fn frame(&mut self, now_ms: u64, measure: &impl TextMeasure) -> FrameView {
        if self.opening.as_ref().is_some_and(|line| now_ms >= line.at_ms) {
            if let Some(opening) = self.opening.take() {
                self.reveal.set_text(&opening.text, None);
            }
        }

        let was_speaking = self.reveal.is_speaking();
        if let Some(completion) = self.reveal.advance(now_ms) {
            self.complete(completion);
        }
        if was_speaking && !self.reveal.is_speaking() {
            self.events
                .push(StageEvent::SteveLine(self.reveal.full_text().to_owned()));
        }

        let loading = self.dialogue.loading_status(now_ms);
        if loading != self.loading {
            if let Some(status) = loading {
                self.events.push(StageEvent::Loading(status));
            }
            self.loading = loading;
        }

        let distortion = self.distortion.frame(self.frame_index);
        let view = FrameView {
            frame_index: self.frame_index,
            segment: self.timeline.current_name().map(str::to_owned),
            video_time: self.timeline.video().time(),
            distortion,
            crt: self.crt,
            steve_box: steve_box(
                measure,
                self.reveal.displayed(),
                self.viewport,
                distortion.text_offset,
            ),
            user_box: user_box(measure, self.reveal.user_text(), self.viewport),
            loading,
            started: self.started,
            muted: self.timeline.video().volume() == 0.0,
        };
        self.frame_index += 1;
        view
    }

    fn complete(&mut self, completion: Completion) {
        match completion {
            Completion::UnlockDialogue => self.unlock_dialogue(),
        }
    }

    fn unlock_dialogue(&mut self) {
        self.dialogue.unlock();
        self.events.push(StageEvent::Unlocked);
    }

    fn enter_loop(&mut self, name: &str) {
        self.timeline.enter_loop(name);
        self.events.push(StageEvent::Segment(name.to_owned()));
    }

    fn play_transition(&mut self, name: &str) {
        self.timeline.play_transition(name);
        self.events.push(StageEvent::Segment(name.to_owned()));
    }
}
