//! dubsync - lip-synced video dubbing
//!
//! Cuts a segment out of a video, transcribes and translates its speech,
//! re-voices it in the speaker's cloned voice fitted to the original timing,
//! and re-renders the speaker's lips to match.

pub mod assemble;
pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod media;
pub mod pipeline;
pub mod quality;
pub mod resync;
pub mod setup;
pub mod subtitle;
pub mod synth;
pub mod timing;
pub mod transcribe;
pub mod transcript;
pub mod translate;
pub mod workflow;
pub mod workspace;
