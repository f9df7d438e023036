//! Headless rehearsal of a conversation against a simulated clock.
//!
//! A script reads like this:
//!
//! ```text
//! ::start
//! ::pause 7s
//!
//! @user
//! hey steve
//!
//! @steve visual=considering
//! Hey. I guess.
//!
//! ::latency 2s
//! @user
//! I give up
//! ::fail
//! ```
//!
//! `@user` blocks are typed key by key once dialogue is unlocked. In scripted
//! mode each send is answered by the next `@steve` block or `::fail`.

use std::collections::VecDeque;
use std::fmt::Write as _;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};

use crate::chat::{ChatLink, ChatOutcome, ChatReply, VisualState};
use crate::dialogue::KeyInput;
use crate::stage::{Stage, StageEvent, StageSettings};
use crate::textbox::MonospaceMetrics;
use crate::timecodes::TimecodeTable;
use crate::video::ClockVideo;

/// Simulated frame length, about 60 fps.
pub const FRAME_MS: u64 = 16;
/// Delay between simulated key presses.
pub const KEY_INTERVAL_MS: u64 = 60;
/// Give up waiting for dialogue to unlock after this long.
pub const UNLOCK_TIMEOUT_MS: u64 = 120_000;
/// Time left running after the last line finishes.
pub const FINAL_HOLD_MS: u64 = 1_500;
/// Longest `::pause` or `::latency` a script may ask for.
pub const MAX_DURATION_MS: u64 = 24 * 60 * 60 * 1000;

const DEFAULT_VIEWPORT: (f32, f32) = (1280.0, 720.0);

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Start,
    User(String),
    Steve(ChatReply),
    Fail,
    Pause(u64),
    Latency(u64),
    Resize(f32, f32),
}

pub fn parse_rehearsal_script(raw: &str) -> Result<Vec<Step>> {
    let normalized = raw.replace("\r\n", "\n");
    if normalized.trim().is_empty() {
        bail!("rehearsal: empty script");
    }

    let mut steps = Vec::new();
    let mut open: Option<OpenBlock> = None;

    for (idx, line) in normalized.lines().enumerate() {
        let line_number = idx + 1;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            if let Some(current) = open.as_mut() {
                current.lines.push(String::new());
            }
            continue;
        }
        if trimmed.starts_with('#') && open.is_none() {
            continue;
        }

        if trimmed.starts_with("::") {
            flush_open_block(&mut open, &mut steps);
            steps.push(parse_directive(trimmed, line_number)?);
            continue;
        }

        if trimmed.starts_with('@') {
            flush_open_block(&mut open, &mut steps);
            open = Some(parse_tag_header(trimmed, line_number)?);
            continue;
        }

        match open.as_mut() {
            Some(current) => current.lines.push(trimmed.to_owned()),
            None => bail!(
                "rehearsal script line {line_number}: text must be inside a @user or @steve block"
            ),
        }
    }

    flush_open_block(&mut open, &mut steps);
    Ok(steps)
}

#[derive(Debug, Clone)]
enum OpenKind {
    User,
    Steve(VisualState),
}

#[derive(Debug, Clone)]
struct OpenBlock {
    kind: OpenKind,
    lines: Vec<String>,
}

fn parse_tag_header(line: &str, line_number: usize) -> Result<OpenBlock> {
    let mut parts = line.split_whitespace();
    let tag = parts
        .next()
        .ok_or_else(|| anyhow!("rehearsal script line {line_number}: missing tag"))?;

    let kind = match tag {
        "@user" => {
            if let Some(extra) = parts.next() {
                bail!("rehearsal script line {line_number}: @user takes no options, got '{extra}'");
            }
            OpenKind::User
        }
        "@steve" => {
            let mut visual_state = VisualState::Other;
            for option in parts {
                match option.split_once('=') {
                    Some(("visual", value)) => {
                        visual_state = VisualState::from(Some(value.to_owned()));
                    }
                    _ => bail!(
                        "rehearsal script line {line_number}: unknown @steve option '{option}'. Hint: visual=dark"
                    ),
                }
            }
            OpenKind::Steve(visual_state)
        }
        _ => bail!(
            "rehearsal script line {line_number}: unknown tag '{tag}'. Hint: use @user or @steve"
        ),
    };

    Ok(OpenBlock {
        kind,
        lines: Vec::new(),
    })
}

/// Joins a block into one line of dialogue. Steve's block may be empty.
fn flush_open_block(open: &mut Option<OpenBlock>, steps: &mut Vec<Step>) {
    let Some(block) = open.take() else {
        return;
    };

    let content = block
        .lines
        .iter()
        .map(String::as_str)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    match block.kind {
        OpenKind::User if content.is_empty() => {}
        OpenKind::User => steps.push(Step::User(content)),
        OpenKind::Steve(visual_state) => steps.push(Step::Steve(ChatReply {
            dialogue: content,
            visual_state,
        })),
    }
}

fn parse_directive(line: &str, line_number: usize) -> Result<Step> {
    let mut parts = line.split_whitespace();
    let directive = parts
        .next()
        .ok_or_else(|| anyhow!("rehearsal script line {line_number}: empty directive"))?;
    let argument = parts.next();
    if parts.next().is_some() {
        bail!("rehearsal script line {line_number}: {directive} accepts at most one argument");
    }

    let required = |hint: &str| {
        argument.ok_or_else(|| {
            anyhow!("rehearsal script line {line_number}: {directive} requires an argument. Hint: {hint}")
        })
    };

    match directive {
        "::start" | "::fail" => {
            if argument.is_some() {
                bail!("rehearsal script line {line_number}: {directive} takes no argument");
            }
            Ok(if directive == "::start" {
                Step::Start
            } else {
                Step::Fail
            })
        }
        "::pause" | "::latency" => {
            let raw = required("::pause 800ms or ::latency 1.8s")?;
            let duration_ms = parse_duration_ms(raw).with_context(|| {
                format!("rehearsal script line {line_number}: unable to parse duration '{raw}'")
            })?;
            Ok(if directive == "::pause" {
                Step::Pause(duration_ms)
            } else {
                Step::Latency(duration_ms)
            })
        }
        "::resize" => {
            let raw = required("::resize 1280x720")?;
            let (width, height) = parse_viewport(raw).with_context(|| {
                format!("rehearsal script line {line_number}: unable to parse viewport '{raw}'")
            })?;
            Ok(Step::Resize(width, height))
        }
        _ => bail!(
            "rehearsal script line {line_number}: unknown directive '{directive}'. Hint: use ::start, ::pause, ::latency, ::fail, or ::resize"
        ),
    }
}

fn parse_duration_ms(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("duration cannot be empty");
    }

    let (number, scale) = if let Some(ms) = raw.strip_suffix("ms") {
        (ms, 1.0)
    } else if let Some(seconds) = raw.strip_suffix('s') {
        (seconds, 1000.0)
    } else {
        bail!("duration must use 'ms' or 's' suffix");
    };

    let value: f64 = number.trim().parse().context("duration is not a number")?;
    if !value.is_finite() || value < 0.0 {
        bail!("duration must be a non-negative finite number");
    }
    let millis = (value * scale).round();
    if millis > MAX_DURATION_MS as f64 {
        bail!("duration exceeds the {}h limit", MAX_DURATION_MS / 3_600_000);
    }
    Ok(millis as u64)
}

fn parse_viewport(raw: &str) -> Result<(f32, f32)> {
    let (width, height) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("viewport must look like WIDTHxHEIGHT"))?;
    let width: u32 = width.trim().parse().context("width is not an integer")?;
    let height: u32 = height.trim().parse().context("height is not an integer")?;
    if width == 0 || height == 0 {
        bail!("viewport dimensions must be > 0");
    }
    Ok((width as f32, height as f32))
}

/// Where replies to the user's messages come from.
pub trait ReplySource {
    fn reply(&mut self, message: &str) -> Result<ChatReply>;
}

#[derive(Debug, Clone, PartialEq)]
enum CannedReply {
    Steve(ChatReply),
    Fail,
}

/// Replies taken in order from the script's `@steve` blocks and `::fail`s.
#[derive(Debug, Default)]
pub struct ScriptedReplies {
    queue: VecDeque<CannedReply>,
}

impl ScriptedReplies {
    pub fn from_steps(steps: &[Step]) -> Self {
        let queue = steps
            .iter()
            .filter_map(|step| match step {
                Step::Steve(reply) => Some(CannedReply::Steve(reply.clone())),
                Step::Fail => Some(CannedReply::Fail),
                _ => None,
            })
            .collect();
        Self { queue }
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl ReplySource for ScriptedReplies {
    fn reply(&mut self, message: &str) -> Result<ChatReply> {
        match self.queue.pop_front() {
            Some(CannedReply::Steve(reply)) => Ok(reply),
            Some(CannedReply::Fail) => Err(anyhow!("scripted network failure")),
            None => Err(anyhow!("script has no reply left for '{message}'")),
        }
    }
}

impl ReplySource for ChatLink {
    fn reply(&mut self, message: &str) -> Result<ChatReply> {
        self.request_blocking(message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptLine {
    pub at_ms: u64,
    pub speaker: &'static str,
    pub text: String,
}

impl TranscriptLine {
    pub fn render(&self) -> String {
        format!(
            "[{:>7.2}s] {}: {}",
            self.at_ms as f64 / 1000.0,
            self.speaker,
            self.text
        )
    }
}

#[derive(Debug, Clone)]
pub struct RehearsalReport {
    pub lines: Vec<TranscriptLine>,
    pub final_segment: Option<String>,
    pub intensity: u32,
    pub crt: bool,
    pub elapsed_ms: u64,
}

impl RehearsalReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            let _ = writeln!(out, "{}", line.render());
        }
        let _ = writeln!(
            out,
            "-- ended in '{}' after {:.2}s, distortion {}, crt {}",
            self.final_segment.as_deref().unwrap_or("-"),
            self.elapsed_ms as f64 / 1000.0,
            self.intensity,
            if self.crt { "on" } else { "off" }
        );
        out
    }

    pub fn lines_for(&self, speaker: &str) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|line| line.speaker == speaker)
            .map(|line| line.text.as_str())
            .collect()
    }
}

/// Drives a [`Stage`] over [`ClockVideo`] through a script.
pub struct Rehearsal {
    stage: Stage<ClockVideo>,
    metrics: MonospaceMetrics,
    now_ms: u64,
    latency_ms: u64,
    lines: Vec<TranscriptLine>,
}

impl Rehearsal {
    pub fn new(table: TimecodeTable, video_duration_secs: f64, settings: StageSettings) -> Self {
        let mut video = ClockVideo::new(video_duration_secs);
        video.mark_loaded(0);
        let mut stage = Stage::new(table, video, settings);
        stage.resize(DEFAULT_VIEWPORT.0, DEFAULT_VIEWPORT.1);
        stage.assets_ready(0);

        let mut rehearsal = Self {
            stage,
            metrics: MonospaceMetrics::default(),
            now_ms: 0,
            latency_ms: 0,
            lines: Vec::new(),
        };
        rehearsal.collect_events();
        rehearsal
    }

    pub fn stage(&self) -> &Stage<ClockVideo> {
        &self.stage
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn run(mut self, steps: &[Step], replies: &mut dyn ReplySource) -> Result<RehearsalReport> {
        for step in steps {
            self.run_step(step, replies)?;
        }
        self.wait_until_quiet()?;
        self.advance(FINAL_HOLD_MS);
        Ok(self.finish())
    }

    fn run_step(&mut self, step: &Step, replies: &mut dyn ReplySource) -> Result<()> {
        match step {
            Step::Start => {
                self.stage.start(self.now_ms);
                self.collect_events();
            }
            Step::Pause(duration_ms) => self.advance(*duration_ms),
            Step::Latency(latency_ms) => self.latency_ms = *latency_ms,
            Step::Resize(width, height) => {
                self.stage.resize(*width, *height);
                self.collect_events();
            }
            Step::User(text) => self.converse(text, replies)?,
            Step::Steve(_) | Step::Fail => {}
        }
        Ok(())
    }

    /// Types `text`, sends it, and delivers the reply after the current
    /// latency.
    fn converse(&mut self, text: &str, replies: &mut dyn ReplySource) -> Result<()> {
        if !self.stage.is_started() {
            info!("rehearsal: starting before first message");
            self.stage.start(self.now_ms);
        }
        self.wait_until_unlocked()?;

        for ch in text.chars() {
            if self.stage.key(KeyInput::Char(ch), self.now_ms).is_some() {
                bail!("rehearsal: a character key sent a message");
            }
            self.advance(KEY_INTERVAL_MS);
        }

        let intensity_before = self.stage.distortion().intensity();
        let Some(request) = self.stage.key(KeyInput::Enter, self.now_ms) else {
            debug!("rehearsal: '{text}' was not sent");
            return Ok(());
        };
        self.collect_events();
        let intensity = self.stage.distortion().intensity();
        if intensity != intensity_before {
            self.push_line("distortion", format!("intensity {intensity}"));
        }

        let result = replies.reply(&request.message);
        self.advance(self.latency_ms);
        self.stage.deliver(ChatOutcome {
            generation: request.generation,
            result,
        });
        self.collect_events();
        Ok(())
    }

    fn wait_until_unlocked(&mut self) -> Result<()> {
        self.wait_for("dialogue to unlock", |stage| !stage.dialogue().is_locked())
    }

    fn wait_until_quiet(&mut self) -> Result<()> {
        self.wait_for("Steve to finish", |stage| {
            !stage.dialogue().is_locked() && !stage.reveal().is_speaking()
        })
    }

    fn wait_for(&mut self, what: &str, done: impl Fn(&Stage<ClockVideo>) -> bool) -> Result<()> {
        let deadline = self.now_ms.saturating_add(UNLOCK_TIMEOUT_MS);
        while !done(&self.stage) {
            if self.now_ms >= deadline {
                bail!(
                    "rehearsal: timed out after {}ms waiting for {what}",
                    UNLOCK_TIMEOUT_MS
                );
            }
            self.frame_step(FRAME_MS);
        }
        Ok(())
    }

    /// Runs frames until `duration_ms` of simulated time has passed.
    pub fn advance(&mut self, duration_ms: u64) {
        let duration_ms = duration_ms.min(MAX_DURATION_MS);
        let target = self.now_ms.saturating_add(duration_ms);
        while self.now_ms < target {
            self.frame_step(FRAME_MS.min(target - self.now_ms));
        }
    }

    fn frame_step(&mut self, step_ms: u64) {
        self.now_ms += step_ms;
        let now_ms = self.now_ms;
        self.stage.video_mut().sync(now_ms);
        self.stage.run_due_ticks(now_ms);
        self.stage.frame(now_ms, &self.metrics);
        self.collect_events();
    }

    fn collect_events(&mut self) {
        for event in self.stage.drain_events() {
            let (speaker, text) = match event {
                StageEvent::Segment(name) => ("video", name),
                StageEvent::Held => ("video", "hold".to_owned()),
                StageEvent::UserSent(text) => ("user", text),
                StageEvent::SteveLine(text) => ("steve", text),
                StageEvent::Blocked(visual_state) => {
                    ("distortion", format!("blocked {}", visual_state.keyword()))
                }
                StageEvent::ReplyFailed(error) => ("error", error),
                StageEvent::StaleReply(generation) => {
                    ("chat", format!("dropped stale reply {generation}"))
                }
                StageEvent::Loading(status) => ("loading", status.to_owned()),
                StageEvent::Unlocked => continue,
            };
            self.push_line(speaker, text);
        }
    }

    fn push_line(&mut self, speaker: &'static str, text: String) {
        self.lines.push(TranscriptLine {
            at_ms: self.now_ms,
            speaker,
            text,
        });
    }

    fn finish(self) -> RehearsalReport {
        RehearsalReport {
            final_segment: self.stage.timeline().current_name().map(str::to_owned),
            intensity: self.stage.distortion().intensity(),
            crt: self.stage.crt(),
            elapsed_ms: self.now_ms,
            lines: self.lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_blocks_and_directives() {
        let script = r#"
# opening
::start
::pause 7s

@user
hey
steve

@steve visual=considering
Hey. I guess.

::latency 1.8s
::resize 800x1000
@user
I give up
::fail
"#;
        let steps = parse_rehearsal_script(script).expect("script");
        assert_eq!(
            steps,
            vec![
                Step::Start,
                Step::Pause(7_000),
                Step::User("hey steve".to_owned()),
                Step::Steve(ChatReply {
                    dialogue: "Hey. I guess.".to_owned(),
                    visual_state: VisualState::Considering,
                }),
                Step::Latency(1_800),
                Step::Resize(800.0, 1000.0),
                Step::User("I give up".to_owned()),
                Step::Fail,
            ]
        );
    }

    #[test]
    fn empty_steve_block_is_an_empty_reply() {
        let steps = parse_rehearsal_script("@user\nhi\n@steve\n").expect("script");
        assert_eq!(
            steps[1],
            Step::Steve(ChatReply {
                dialogue: String::new(),
                visual_state: VisualState::Other,
            })
        );
    }

    #[test]
    fn rejects_malformed_scripts_with_line_numbers() {
        for (script, needle) in [
            ("hello", "line 1"),
            ("@narrator\nhi", "unknown tag"),
            ("@steve mood=dark\nhi", "unknown @steve option"),
            ("::pause soon", "unable to parse duration"),
            ("::pause", "requires an argument"),
            ("::resize 0x10", "unable to parse viewport"),
            ("::start now", "takes no argument"),
            ("::dance", "unknown directive"),
            ("   ", "empty script"),
        ] {
            let error = parse_rehearsal_script(script).unwrap_err();
            assert!(format!("{error:#}").contains(needle), "{script:?}: {error:#}");
        }
    }

    #[test]
    fn durations_accept_ms_and_seconds() {
        assert_eq!(parse_duration_ms("800ms").expect("ms"), 800);
        assert_eq!(parse_duration_ms("1.8s").expect("s"), 1_800);
        assert!(parse_duration_ms("-1s").is_err());
        assert!(parse_duration_ms("12").is_err());
        assert!(parse_duration_ms("24h").is_err());
        assert_eq!(parse_duration_ms("86400s").expect("limit"), MAX_DURATION_MS);
    }

    #[test]
    fn durations_past_a_day_are_rejected() {
        for raw in ["86400001ms", "1e19s", "1e300ms"] {
            let error = parse_duration_ms(raw).unwrap_err();
            assert!(error.to_string().contains("24h limit"), "{raw}: {error}");
        }
        let error = parse_rehearsal_script("::start\n::pause 1s\n::pause 1e19s\n").unwrap_err();
        assert!(format!("{error:#}").contains("line 3"), "{error:#}");
    }

    #[test]
    fn scripted_replies_run_out_as_failures() {
        let steps = vec![Step::Fail];
        let mut replies = ScriptedReplies::from_steps(&steps);
        assert!(replies.reply("one").is_err());
        let error = replies.reply("two").unwrap_err();
        assert!(error.to_string().contains("no reply left"));
    }

    #[test]
    fn transcript_line_format() {
        let line = TranscriptLine {
            at_ms: 5_500,
            speaker: "steve",
            text: "...(sigh)".to_owned(),
        };
        assert_eq!(line.render(), "[   5.50s] steve: ...(sigh)");
    }

    #[test]
    fn opening_line_plays_when_user_waits() {
        let steps = parse_rehearsal_script("::start\n::pause 10s\n").expect("script");
        let mut replies = ScriptedReplies::from_steps(&steps);
        let report = Rehearsal::new(TimecodeTable::room(), 50.0, StageSettings::default())
            .run(&steps, &mut replies)
            .expect("report");
        assert_eq!(report.lines_for("steve"), vec!["...(sigh)"]);
        assert_eq!(report.lines_for("video")[..3], ["menu", "intro", "dim"]);
    }
}
