//! Core library: conversation history, search-type classification,
//! retrieval, context sufficiency, augmentation, and answer composition.

pub mod augment;
pub mod classifier;
pub mod composer;
pub mod config;
pub mod error;
pub mod history;
pub mod judge;
pub mod locations;
pub mod models;
pub mod pipeline;
pub mod retriever;
