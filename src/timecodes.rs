use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;

use crate::error_codes::CodedError;

pub const MENU: &str = "menu";
pub const DIM: &str = "dim";
pub const BRIGHT: &str = "bright";
pub const INTRO: &str = "intro";
pub const DIM_TO_BRIGHT: &str = "dim_to_bright";
pub const BRIGHT_TO_BLINDING: &str = "bright_to_blinding";
pub const COLLAPSE: &str = "collapse";

const REQUIRED_LOOPS: &[&str] = &[MENU, DIM, BRIGHT];
const REQUIRED_TRANSITIONS: &[&str] = &[INTRO, DIM_TO_BRIGHT, BRIGHT_TO_BLINDING, COLLAPSE];

/// Half-open interval of the source video, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Span {
    pub start: f64,
    pub end: f64,
}

impl Span {
    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !self.start.is_finite() || !self.end.is_finite() || self.start < 0.0 {
            return Err(anyhow!(CodedError::config(
                "INVALID_SPAN",
                format!("segment '{name}' must have finite, non-negative bounds"),
            )
            .with_details(json!({ "segment": name, "start": self.start, "end": self.end }))));
        }
        if self.start >= self.end {
            return Err(anyhow!(CodedError::config(
                "INVALID_SPAN",
                format!(
                    "segment '{name}' start {} must be before end {}",
                    self.start, self.end
                ),
            )
            .with_details(json!({ "segment": name, "start": self.start, "end": self.end }))));
        }
        Ok(())
    }
}

/// Where a transition goes once it reaches its end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Successor {
    Loop(String),
    Transition(String),
    /// Pause on the last frame.
    Hold,
}

impl Successor {
    /// Name of the segment played next, `None` for a hold.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Loop(name) | Self::Transition(name) => Some(name),
            Self::Hold => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionSpec {
    pub span: Span,
    pub next: Successor,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTable {
    loops: BTreeMap<String, Span>,
    transitions: BTreeMap<String, RawTransition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTransition {
    start: f64,
    end: f64,
    #[serde(default, alias = "nextState")]
    next_state: Option<String>,
}

/// Loop and transition timecodes of the room video. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct TimecodeTable {
    loops: BTreeMap<String, Span>,
    transitions: BTreeMap<String, TransitionSpec>,
}

impl TimecodeTable {
    /// The timecodes cut into `room.webm`.
    pub fn room() -> Self {
        let loops = [
            (MENU, Span::new(0.0, 4.0)),
            (DIM, Span::new(9.03, 19.0)),
            (BRIGHT, Span::new(24.03, 34.0)),
        ];
        let transitions = [
            (INTRO, Span::new(4.03, 9.0), Successor::Loop(DIM.to_owned())),
            (
                DIM_TO_BRIGHT,
                Span::new(19.03, 24.0),
                Successor::Loop(BRIGHT.to_owned()),
            ),
            (
                BRIGHT_TO_BLINDING,
                Span::new(34.03, 44.0),
                Successor::Transition(COLLAPSE.to_owned()),
            ),
            (COLLAPSE, Span::new(44.03, 50.0), Successor::Loop(DIM.to_owned())),
        ];

        Self {
            loops: loops
                .into_iter()
                .map(|(name, span)| (name.to_owned(), span))
                .collect(),
            transitions: transitions
                .into_iter()
                .map(|(name, span, next)| (name.to_owned(), TransitionSpec { span, next }))
                .collect(),
        }
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let raw: RawTable = serde_yaml::from_str(contents).map_err(|error| {
            let location = error
                .location()
                .map(|location| format!("line {}, column {}", location.line(), location.column()))
                .unwrap_or_else(|| "unknown location".to_owned());
            anyhow!("failed to parse timecode yaml at {}: {}", location, error)
        })?;
        Self::from_raw(raw)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read timecodes {}", path.display()))?;
        Self::from_yaml_str(&contents)
            .with_context(|| format!("invalid timecodes in {}", path.display()))
    }

    fn from_raw(raw: RawTable) -> Result<Self> {
        for (name, span) in &raw.loops {
            span.validate(name)?;
            if raw.transitions.contains_key(name) {
                return Err(anyhow!(CodedError::config(
                    "DUPLICATE_SEGMENT",
                    format!("'{name}' is defined as both a loop and a transition"),
                )));
            }
        }

        let mut transitions = BTreeMap::new();
        for (name, transition) in &raw.transitions {
            let span = Span::new(transition.start, transition.end);
            span.validate(name)?;
            let next = match transition.next_state.as_deref().map(str::trim) {
                None | Some("") => Successor::Hold,
                Some(next) if raw.loops.contains_key(next) => Successor::Loop(next.to_owned()),
                Some(next) if raw.transitions.contains_key(next) => {
                    Successor::Transition(next.to_owned())
                }
                Some(next) => {
                    return Err(anyhow!(CodedError::config(
                        "UNKNOWN_SUCCESSOR",
                        format!("transition '{name}' names unknown next_state '{next}'"),
                    )
                    .with_details(json!({ "transition": name, "next_state": next }))));
                }
            };
            transitions.insert(name.clone(), TransitionSpec { span, next });
        }

        let table = Self {
            loops: raw.loops,
            transitions,
        };
        table.ensure_required_segments()?;
        Ok(table)
    }

    fn ensure_required_segments(&self) -> Result<()> {
        let missing_loops = REQUIRED_LOOPS
            .iter()
            .filter(|name| !self.loops.contains_key(**name))
            .copied()
            .collect::<Vec<_>>();
        let missing_transitions = REQUIRED_TRANSITIONS
            .iter()
            .filter(|name| !self.transitions.contains_key(**name))
            .copied()
            .collect::<Vec<_>>();

        if missing_loops.is_empty() && missing_transitions.is_empty() {
            return Ok(());
        }

        Err(anyhow!(CodedError::config(
            "MISSING_SEGMENT",
            format!(
                "timecodes are missing required segments (loops: [{}], transitions: [{}])",
                missing_loops.join(", "),
                missing_transitions.join(", ")
            ),
        )
        .with_details(json!({
            "missing_loops": missing_loops,
            "missing_transitions": missing_transitions,
        }))))
    }

    pub fn loop_span(&self, name: &str) -> Option<Span> {
        self.loops.get(name).copied()
    }

    pub fn transition(&self, name: &str) -> Option<&TransitionSpec> {
        self.transitions.get(name)
    }

    pub fn loops(&self) -> impl Iterator<Item = (&str, Span)> {
        self.loops.iter().map(|(name, span)| (name.as_str(), *span))
    }

    pub fn transitions(&self) -> impl Iterator<Item = (&str, &TransitionSpec)> {
        self.transitions
            .iter()
            .map(|(name, spec)| (name.as_str(), spec))
    }
}

impl Default for TimecodeTable {
    fn default() -> Self {
        Self::room()
    }
}
