pub const FONT_SIZE: f32 = 20.0;
pub const BOX_PADDING: f32 = 12.0;
/// Boxes wrap at this fraction of the viewport width.
pub const WRAP_FRACTION: f32 = 0.35;
/// Opacity of the black box behind each line, 0-255.
pub const BOX_ALPHA: u8 = 190;

const STEVE_ANCHOR: (f32, f32) = (0.1, 0.9);
const USER_ANCHOR: (f32, f32) = (0.9, 0.9);

pub trait TextMeasure {
    fn text_width(&self, text: &str) -> f32;
    /// Ascent plus descent of one line.
    fn line_height(&self) -> f32;
}

/// Fixed-advance metrics for a monospaced face.
#[derive(Debug, Clone, Copy)]
pub struct MonospaceMetrics {
    pub advance: f32,
    pub line_height: f32,
}

impl MonospaceMetrics {
    pub fn for_font_size(font_size: f32) -> Self {
        Self {
            advance: (font_size * 0.6).round().max(1.0),
            line_height: (font_size * 1.3).round().max(1.0),
        }
    }
}

impl Default for MonospaceMetrics {
    fn default() -> Self {
        Self::for_font_size(FONT_SIZE)
    }
}

impl TextMeasure for MonospaceMetrics {
    fn text_width(&self, text: &str) -> f32 {
        text.chars().count() as f32 * self.advance
    }

    fn line_height(&self) -> f32 {
        self.line_height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    /// Box grows rightwards from the anchor.
    Left,
    /// Box grows leftwards from the anchor.
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextBox {
    pub text: String,
    pub rect: Rect,
    /// Top-left of the text inside the box.
    pub text_origin: (f32, f32),
    pub wrap_width: f32,
    pub lines: u32,
}

/// Lays out one dialogue box whose bottom edge sits at `y_bottom`.
/// Empty text gets no box.
pub fn layout_box(
    measure: &impl TextMeasure,
    text: &str,
    x: f32,
    y_bottom: f32,
    align: Align,
    viewport_width: f32,
) -> Option<TextBox> {
    if text.is_empty() {
        return None;
    }

    let wrap_width = (viewport_width * WRAP_FRACTION).max(1.0);
    let text_width = measure.text_width(text);
    let lines = ((text_width / wrap_width).ceil() as u32).max(1);
    let height = measure.line_height() * lines as f32 + BOX_PADDING * 2.0;
    let width = text_width.min(wrap_width) + BOX_PADDING * 2.0;
    let box_x = match align {
        Align::Left => x,
        Align::Right => x - width,
    };
    let box_y = y_bottom - height;

    Some(TextBox {
        text: text.to_owned(),
        rect: Rect {
            x: box_x,
            y: box_y,
            w: width,
            h: height,
        },
        text_origin: (box_x + BOX_PADDING, box_y + BOX_PADDING),
        wrap_width,
        lines,
    })
}

/// Steve's box, left-aligned near the bottom-left corner, nudged by `jitter`.
pub fn steve_box(
    measure: &impl TextMeasure,
    text: &str,
    viewport: (f32, f32),
    jitter: (f32, f32),
) -> Option<TextBox> {
    let (width, height) = viewport;
    layout_box(
        measure,
        text,
        width * STEVE_ANCHOR.0 + jitter.0,
        height * STEVE_ANCHOR.1 + jitter.1,
        Align::Left,
        width,
    )
}

/// The user's box, right-aligned near the bottom-right corner.
pub fn user_box(measure: &impl TextMeasure, text: &str, viewport: (f32, f32)) -> Option<TextBox> {
    let (width, height) = viewport;
    layout_box(
        measure,
        text,
        width * USER_ANCHOR.0,
        height * USER_ANCHOR.1,
        Align::Right,
        width,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const METRICS: MonospaceMetrics = MonospaceMetrics {
        advance: 10.0,
        line_height: 24.0,
    };

    #[test]
    fn empty_text_has_no_box() {
        assert_eq!(steve_box(&METRICS, "", (1000.0, 800.0), (0.0, 0.0)), None);
        assert_eq!(user_box(&METRICS, "", (1000.0, 800.0)), None);
    }

    #[test]
    fn short_line_is_one_line_and_hugs_text() {
        let text_box = steve_box(&METRICS, "hey", (1000.0, 800.0), (0.0, 0.0)).expect("box");
        assert_eq!(text_box.lines, 1);
        assert_eq!(
            text_box.rect,
            Rect {
                x: 100.0,
                y: 720.0 - (24.0 + 24.0),
                w: 30.0 + 24.0,
                h: 24.0 + 24.0,
            }
        );
        assert_eq!(text_box.text_origin, (112.0, 720.0 - 48.0 + 12.0));
    }

    #[test]
    fn long_line_wraps_and_grows_upwards() {
        // 100 chars * 10px = 1000px against a 350px wrap width.
        let text = "x".repeat(100);
        let text_box = user_box(&METRICS, &text, (1000.0, 800.0)).expect("box");
        assert_eq!(text_box.lines, 3);
        assert_eq!(text_box.rect.w, 350.0 + 24.0);
        assert_eq!(text_box.rect.h, 24.0 * 3.0 + 24.0);
        assert_eq!(text_box.rect.x + text_box.rect.w, 900.0);
        assert_eq!(text_box.rect.y + text_box.rect.h, 720.0);
    }

    #[test]
    fn jitter_moves_steve_box_only() {
        let still = steve_box(&METRICS, "hey", (1000.0, 800.0), (0.0, 0.0)).expect("box");
        let shaken = steve_box(&METRICS, "hey", (1000.0, 800.0), (3.0, -2.0)).expect("box");
        assert_eq!(shaken.rect.x, still.rect.x + 3.0);
        assert_eq!(shaken.rect.y, still.rect.y - 2.0);
    }
}
