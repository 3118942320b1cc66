//! Router module for upstream route selection.
//!
//! Decides whether a chat turn goes to text completion or image generation
//! using case-insensitive trigger phrase matching.

mod selector;

pub use selector::{Route, RouteClassifier};
