//! # Segcraft Common Library
//!
//! Shared code for the segment fabrication service including:
//! - Chain, segment and library content models
//! - Database initialization, migrations and settings access
//! - Configuration loading
//! - Timestamp helpers
//! - Music theory primitives (pitch classes, keys, chords)

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod music;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
pub use music::{Chord, Key, Mode, PitchClass};
