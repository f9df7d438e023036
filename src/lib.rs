pub mod chat;
pub mod config;
pub mod dialogue;
pub mod distortion;
pub mod error_codes;
pub mod logging;
#[cfg(feature = "play")]
pub mod play;
pub mod rehearsal;
pub mod reveal;
pub mod stage;
pub mod textbox;
pub mod timecodes;
pub mod timeline;
pub mod video;
