//! Orbit Reader - a folder-based feed reader with gist sync
//!
//! Feeds are organized into folders, resolved through a feed-to-JSON proxy,
//! merged newest first and cached for a few minutes. Read state, folders and
//! settings live in a local SQLite key-value store and can be mirrored to a
//! private GitHub gist. A small JSON API serves an external front end.

pub mod cache;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod reader;
pub mod routes;
pub mod state;
pub mod sync;
