//! PCM bridge: play raw PCM received over TCP, or from a file, through a local output device.

pub mod cli;
pub mod config;
pub mod runtime;

mod net;
