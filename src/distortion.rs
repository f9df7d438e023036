use log::info;

use crate::chat::VisualState;

/// Video shake per intensity level, in pixels.
pub const BASE_SHAKE_PX: f32 = 1.5;
/// Steve's text-box shake per intensity level, in pixels.
pub const TEXT_SHAKE_PX: f32 = 2.0;
/// Red flicker opacity per intensity level, 0-255.
pub const BASE_RED_TINT_ALPHA: u32 = 10;
/// Darkening opacity per intensity level, 0-255.
pub const BASE_DARKEN_ALPHA: u32 = 100;
/// Flicker period in frames at intensity 0; shrinks by one per level.
pub const BASE_FLICKER_PERIOD: u32 = 10;
pub const MIN_FLICKER_PERIOD: u32 = 2;

const GIVE_UP_PHRASE: &str = "give up";

const SALT_SHAKE_X: u64 = 0x5348_414b_4558;
const SALT_SHAKE_Y: u64 = 0x5348_414b_4559;
const SALT_TEXT_X: u64 = 0x5445_5854_58;
const SALT_TEXT_Y: u64 = 0x5445_5854_59;

pub fn is_give_up(message: &str) -> bool {
    message.to_lowercase().contains(GIVE_UP_PHRASE)
}

/// Everything the host needs to draw one distorted frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistortionFrame {
    pub video_offset: (f32, f32),
    pub text_offset: (f32, f32),
    pub darken_alpha: u8,
    /// 0 on frames where the flicker is off.
    pub red_alpha: u8,
    pub flicker_period: u32,
}

impl DistortionFrame {
    pub const CALM: Self = Self {
        video_offset: (0.0, 0.0),
        text_offset: (0.0, 0.0),
        darken_alpha: 0,
        red_alpha: 0,
        flicker_period: BASE_FLICKER_PERIOD,
    };
}

/// Escalation driven by consecutive "give up" messages.
#[derive(Debug, Clone, Default)]
pub struct Distortion {
    intensity: u32,
    seed: u64,
}

impl Distortion {
    pub fn new(seed: u64) -> Self {
        Self { intensity: 0, seed }
    }

    pub fn intensity(&self) -> u32 {
        self.intensity
    }

    pub fn register_give_up(&mut self) {
        self.intensity = self.intensity.saturating_add(1);
        info!("distortion: 'give up' detected, intensity now {}", self.intensity);
    }

    pub fn reset(&mut self) {
        self.intensity = 0;
    }

    /// Escalates or resets depending on what the user just sent.
    pub fn observe_message(&mut self, message: &str) {
        if is_give_up(message) {
            self.register_give_up();
        } else {
            self.reset();
        }
    }

    /// Drops a requested visual state that distortion forbids. While the
    /// user keeps giving up, Steve cannot brighten.
    pub fn gate(&self, visual_state: VisualState) -> Option<VisualState> {
        if self.intensity > 0 && visual_state == VisualState::Bright {
            info!("distortion: blocking 'bright' at intensity {}", self.intensity);
            return None;
        }
        Some(visual_state)
    }

    pub fn frame(&self, frame_index: u64) -> DistortionFrame {
        if self.intensity == 0 {
            return DistortionFrame::CALM;
        }
        let level = self.intensity as f32;
        let shake = BASE_SHAKE_PX * level;
        let text_shake = TEXT_SHAKE_PX * level;
        let period = flicker_period(self.intensity);
        let flicker_on = (frame_index % u64::from(period)) * 2 < u64::from(period);

        DistortionFrame {
            video_offset: (
                self.jitter(frame_index, SALT_SHAKE_X, shake),
                self.jitter(frame_index, SALT_SHAKE_Y, shake),
            ),
            text_offset: (
                self.jitter(frame_index, SALT_TEXT_X, text_shake),
                self.jitter(frame_index, SALT_TEXT_Y, text_shake),
            ),
            darken_alpha: scaled_alpha(BASE_DARKEN_ALPHA, self.intensity),
            red_alpha: if flicker_on {
                scaled_alpha(BASE_RED_TINT_ALPHA, self.intensity)
            } else {
                0
            },
            flicker_period: period,
        }
    }

    /// Uniform in `[-magnitude, magnitude]`, stable for a given frame.
    fn jitter(&self, frame_index: u64, salt: u64, magnitude: f32) -> f32 {
        if !magnitude.is_finite() || magnitude <= 0.0 {
            return 0.0;
        }
        let hashed = hash_u64(self.seed ^ salt ^ frame_index.rotate_left(17));
        let unit = (hashed >> 11) as f64 / (1_u64 << 53) as f64;
        ((unit * 2.0 - 1.0) * f64::from(magnitude)) as f32
    }
}

pub fn flicker_period(intensity: u32) -> u32 {
    BASE_FLICKER_PERIOD
        .saturating_sub(intensity)
        .max(MIN_FLICKER_PERIOD)
}

fn scaled_alpha(base: u32, intensity: u32) -> u8 {
    base.saturating_mul(intensity).min(255) as u8
}

fn hash_u64(mut value: u64) -> u64 {
    value ^= value >> 33;
    value = value.wrapping_mul(0xff51_afd7_ed55_8ccd);
    value ^= value >> 33;
    value = value.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    value ^= value >> 33;
    value
}
