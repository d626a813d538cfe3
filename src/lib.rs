//! Catalog sync library - reconcile source playlists and favorites into a
//! target music catalog.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod library;
pub mod limiter;
pub mod matching;
pub mod models;
pub mod normalize;
pub mod pagination;
pub mod progress;
pub mod reconcile;
pub mod resolver;
pub mod store;
pub mod transfer;

pub use error::SyncError;
pub use reconcile::{sync_playlist, SyncContext};
pub use resolver::resolve_single;
pub use transfer::transfer_library;
