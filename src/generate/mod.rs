//! Image generation adapter.

mod client;
mod error;

pub use client::{GeneratedBatch, GenerationClient, render_prompt, save_images};
pub use error::GenerationError;
