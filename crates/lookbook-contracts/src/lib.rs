//! Shared types for the lookbook service: item schema, bounding-box
//! geometry, data URLs, prompt templates, model selection and the request
//! event log.

pub mod data_url;
pub mod events;
pub mod geometry;
pub mod items;
pub mod models;
pub mod prompts;
pub mod schema;
