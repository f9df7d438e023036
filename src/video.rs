/// What the stage needs from whatever actually decodes and shows the video.
///
/// Mirrors a browser media element: `seek` may land asynchronously, so a
/// `time()` read right after a seek can still report the old position.
/// `duration()` reports 0 until the media is loaded.
pub trait VideoPlayback {
    fn play(&mut self);
    fn pause(&mut self);
    fn time(&self) -> f64;
    fn seek(&mut self, seconds: f64);
    fn duration(&self) -> f64;
    fn volume(&self) -> f32;
    fn set_volume(&mut self, volume: f32);
}

/// Stand-in video driven by an explicit millisecond clock.
///
/// Used by the headless rehearsal and the preview window, which have no
/// decoder. Playback position advances with `sync(now_ms)` while playing and
/// stops at the end of the media.
#[derive(Debug, Clone)]
pub struct ClockVideo {
    duration_secs: f64,
    loaded: bool,
    is_playing: bool,
    anchor_ms: u64,
    anchor_secs: f64,
    position_secs: f64,
    volume: f32,
}

impl ClockVideo {
    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs: duration_secs.max(0.0),
            loaded: false,
            is_playing: false,
            anchor_ms: 0,
            anchor_secs: 0.0,
            position_secs: 0.0,
            volume: 0.0,
        }
    }

    pub fn mark_loaded(&mut self, now_ms: u64) {
        self.loaded = true;
        self.anchor_ms = now_ms;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// Brings the playback position up to `now_ms`.
    pub fn sync(&mut self, now_ms: u64) {
        if !self.loaded {
            return;
        }
        if self.is_playing {
            let elapsed = now_ms.saturating_sub(self.anchor_ms) as f64 / 1000.0;
            self.position_secs = (self.anchor_secs + elapsed).min(self.duration_secs);
        }
        self.anchor_ms = now_ms;
        self.anchor_secs = self.position_secs;
    }
}

impl VideoPlayback for ClockVideo {
    fn play(&mut self) {
        self.is_playing = true;
    }

    fn pause(&mut self) {
        self.is_playing = false;
    }

    fn time(&self) -> f64 {
        self.position_secs
    }

    fn seek(&mut self, seconds: f64) {
        self.position_secs = seconds.clamp(0.0, self.duration_secs);
        self.anchor_secs = self.position_secs;
    }

    fn duration(&self) -> f64 {
        if self.loaded {
            self.duration_secs
        } else {
            0.0
        }
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::{ClockVideo, VideoPlayback};

    #[test]
    fn unloaded_video_reports_zero_duration() {
        let video = ClockVideo::new(50.0);
        assert_eq!(video.duration(), 0.0);
    }

    #[test]
    fn paused_clock_does_not_advance() {
        let mut video = ClockVideo::new(50.0);
        video.mark_loaded(0);
        video.seek(5.0);
        video.sync(30_000);
        assert_eq!(video.time(), 5.0);
    }

    #[test]
    fn playing_clock_advances_from_last_seek() {
        let mut video = ClockVideo::new(50.0);
        video.mark_loaded(0);
        video.play();
        video.sync(1_000);
        video.seek(9.03);
        video.sync(3_000);
        assert!((video.time() - 11.03).abs() < 1e-9);
    }

    #[test]
    fn playback_stops_at_end_of_media() {
        let mut video = ClockVideo::new(50.0);
        video.mark_loaded(0);
        video.play();
        video.sync(120_000);
        assert_eq!(video.time(), 50.0);
    }

    #[test]
    fn volume_is_clamped() {
        let mut video = ClockVideo::new(1.0);
        video.set_volume(3.0);
        assert_eq!(video.volume(), 1.0);
        video.set_volume(-1.0);
        assert_eq!(video.volume(), 0.0);
    }
}
