//! # droidherd-vision - Frames, Templates, and Matching
//!
//! Image support for the automation engine: owned BGR pixel frames with a
//! PNG codec, the persistent template store, and normalized cross-correlation
//! template matching.
//!
//! Depends only on [`droidherd_core`].

pub mod frame;
pub mod matcher;
pub mod store;

pub use frame::{Frame, Region};
pub use matcher::{best_match, match_all, Match};
pub use store::{TemplateMeta, TemplateStore};
