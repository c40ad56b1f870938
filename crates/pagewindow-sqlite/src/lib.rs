//! SQLite-backed sources for pagewindow.
//!
//! [`SqliteStore`] owns the connection and the write path. [`SqliteMediaSource`]
//! and [`SqliteMessageSource`] read through whatever transaction the caller
//! hands the window.

pub mod error;
pub mod media;
pub mod messages;
pub mod store;

pub use error::{Result, StoreError};
pub use media::{MediaItem, SqliteMediaSource};
pub use messages::{Message, SqliteMessageSource};
pub use store::SqliteStore;
