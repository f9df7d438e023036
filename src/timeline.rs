use log::{debug, error, info};

use crate::timecodes::{Span, Successor, TimecodeTable, DIM};
use crate::video::VideoPlayback;

/// Cadence the host must call [`TimelineController::tick`] at.
pub const TICK_INTERVAL_MS: u64 = 100;

/// Distance from the end of the media at which any state is abandoned for the
/// dim loop. Seeks land late, so waiting for the exact end risks the media
/// stopping on its last frame before a tick notices.
pub const SAFETY_NET_MARGIN_SECS: f64 = 0.2;

/// A transition hands over this long before its nominal end, so the seek to
/// the successor lands before the transition's last frame is shown.
pub const TRANSITION_EXIT_MARGIN_SECS: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub enum TimelineState {
    Loop {
        name: String,
        span: Span,
    },
    Transition {
        name: String,
        span: Span,
        next: Successor,
    },
}

impl TimelineState {
    pub fn name(&self) -> &str {
        match self {
            Self::Loop { name, .. } | Self::Transition { name, .. } => name,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::Loop { span, .. } | Self::Transition { span, .. } => *span,
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(self, Self::Loop { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No state yet, or media not loaded.
    Idle,
    Steady,
    /// Loop playback drifted out of its span and was sent back to the start.
    Reseeked,
    /// Media was about to run out; forced into the dim loop.
    SafetyNet,
    /// A transition finished and handed over to its successor.
    Advanced(String),
    /// A transition with no successor finished; playback paused. Reported
    /// once per hold, later ticks are `Steady`.
    Held,
}

/// Keeps the video inside the current segment and moves between segments.
pub struct TimelineController<V> {
    table: TimecodeTable,
    video: V,
    current: Option<TimelineState>,
    held: bool,
}

impl<V: VideoPlayback> TimelineController<V> {
    pub fn new(table: TimecodeTable, video: V) -> Self {
        Self {
            table,
            video,
            current: None,
            held: false,
        }
    }

    pub fn current(&self) -> Option<&TimelineState> {
        self.current.as_ref()
    }

    pub fn current_name(&self) -> Option<&str> {
        self.current.as_ref().map(TimelineState::name)
    }

    /// True while paused on the last frame of a transition with no successor.
    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn table(&self) -> &TimecodeTable {
        &self.table
    }

    pub fn video(&self) -> &V {
        &self.video
    }

    pub fn video_mut(&mut self) -> &mut V {
        &mut self.video
    }

    /// Callers must only pass loop names present in the table.
    pub fn enter_loop(&mut self, name: &str) {
        let Some(span) = self.table.loop_span(name) else {
            error!("timeline: unknown loop '{name}'");
            debug_assert!(false, "unknown loop '{name}'");
            return;
        };

        info!("timeline: entering loop '{name}' [{:.2}s, {:.2}s)", span.start, span.end);
        self.current = Some(TimelineState::Loop {
            name: name.to_owned(),
            span,
        });
        self.held = false;
        self.video.play();
        self.video.seek(span.start);
    }

    /// Callers must only pass transition names present in the table.
    pub fn play_transition(&mut self, name: &str) {
        let Some(spec) = self.table.transition(name) else {
            error!("timeline: unknown transition '{name}'");
            debug_assert!(false, "unknown transition '{name}'");
            return;
        };

        info!(
            "timeline: playing transition '{name}' [{:.2}s, {:.2}s)",
            spec.span.start, spec.span.end
        );
        let span = spec.span;
        self.current = Some(TimelineState::Transition {
            name: name.to_owned(),
            span,
            next: spec.next.clone(),
        });
        self.held = false;
        self.video.play();
        self.video.seek(span.start);
    }

    pub fn tick(&mut self) -> TickOutcome {
        let Some(current) = self.current.as_ref() else {
            return TickOutcome::Idle;
        };
        let duration = self.video.duration();
        if duration == 0.0 {
            return TickOutcome::Idle;
        }
        let t = self.video.time();

        if t >= duration - SAFETY_NET_MARGIN_SECS {
            debug!("timeline: t={t:.2}s is within {SAFETY_NET_MARGIN_SECS}s of the end");
            self.enter_loop(DIM);
            return TickOutcome::SafetyNet;
        }

        match current {
            TimelineState::Loop { span, .. } => {
                if span.contains(t) {
                    return TickOutcome::Steady;
                }
                let start = span.start;
                self.video.seek(start);
                TickOutcome::Reseeked
            }
            TimelineState::Transition { span, next, .. } => {
                if t < span.end - TRANSITION_EXIT_MARGIN_SECS {
                    return TickOutcome::Steady;
                }
                match next.clone() {
                    Successor::Loop(name) => {
                        self.enter_loop(&name);
                        TickOutcome::Advanced(name)
                    }
                    Successor::Transition(name) => {
                        self.play_transition(&name);
                        TickOutcome::Advanced(name)
                    }
                    Successor::Hold if self.held => TickOutcome::Steady,
                    Successor::Hold => {
                        info!("timeline: holding on the last frame of '{}'", current.name());
                        self.video.pause();
                        self.held = true;
                        TickOutcome::Held
                    }
                }
            }
        }
    }
}
