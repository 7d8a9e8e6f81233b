//! Streaming PCM playback engine.
//!
//! Raw sample bytes arriving in arbitrary chunks are decoded ([`encoding`]), accumulated into
//! fixed-duration frames, and scheduled back to back on an output sink's clock
//! ([`scheduler::Player`]). Sinks implement [`sink::OutputSink`]; [`playback::CpalSink`] plays
//! through a CPAL device and [`sink::ManualSink`] records frames against a manual clock.

pub mod config;
pub mod device;
pub mod encoding;
pub mod frame;
pub mod playback;
pub mod scheduler;
pub mod sink;
pub mod status;

pub use config::PlaybackConfig;
pub use encoding::{Encoding, EncodingProfile};
pub use frame::ScheduledFrame;
pub use playback::{CpalSink, OutputOptions};
pub use scheduler::{Player, PlayerEvent};
pub use sink::{ClockState, ManualSink, OutputSink};
pub use status::{PlayerCounters, StatusSnapshot};
