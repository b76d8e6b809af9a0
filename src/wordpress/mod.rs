//! WordPress REST API integration.
//!
//! [`client`] wraps the `wp-json/wp/v2` endpoints the agent uses: media
//! listing, attachment-context lookup, and metadata write-back. [`types`]
//! holds the wire types, the error taxonomy, and the content hash that the
//! dedup ledger keys on.

pub mod client;
pub mod types;

pub use client::WordPressClient;
pub use types::{content_hash, strip_html, MediaAsset, MediaItem, WpError};
