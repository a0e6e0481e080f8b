//! Chronicler - turns tabletop session recordings into wiki-ready stories
//!
//! Session audio or notes are uploaded over HTTP, transcribed, drafted into a
//! narrative by a language model, refined over a multi-turn conversation and
//! finally published to a Confluence wiki.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
