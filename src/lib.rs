//! Unattended lo-fi streaming station.
//!
//! Builds a shuffled concat playlist from a music folder, keeps one ffmpeg
//! process pushing it (over a background video, logo and spectrum bar) to an
//! RTMP ingest, and maintains a now-playing text file that ffmpeg overlays.
//! When the encoder dies for any reason the [`Supervisor`] backs off, waits
//! for the ingest host to be reachable again and starts a fresh cycle.

pub mod boot;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod duration;
pub mod error;
pub mod gate;
pub mod label;
pub mod pipeline;
pub mod playlist;
pub mod process;
pub mod schedule;
pub mod signals;
pub mod status;
pub mod supervisor;

pub use config::{Config, PipelineMode};
pub use error::{ConfigError, ProcessError};
pub use supervisor::Supervisor;
