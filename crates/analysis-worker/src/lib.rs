//! Game analysis and training pipeline.
//!
//! Games come in through [`sync`], are replayed and scored by [`analyzer`]
//! with a UCI engine behind [`engine`], and their mistakes become
//! [`training`] positions. [`jobs`] runs all of it in the background and
//! publishes progress through [`progress`].

pub mod analysis;
pub mod analyzer;
pub mod chess_com;
pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod progress;
pub mod stockfish;
pub mod store;
pub mod sync;
pub mod training;

pub use error::WorkerError;
