//! Streaming extraction engine for Hacker News pages.
//!
//! Every fetch is one forward pass over the markup stream: selector
//! subscriptions assemble records as tag and text events arrive, and a
//! capacity-1 bridge hands them to the caller in document order. Nothing is
//! buffered beyond the record under construction, so the first listing of a
//! page is available before the rest of the page has downloaded, and
//! cancelling a stream abandons the download mid-body.

mod assemble;
mod bridge;
mod client;
mod error;
mod extract;
mod models;
mod normalize;

pub use bridge::RecordStream;
pub use client::{Client, BASE_URL};
pub use error::ExtractError;
pub use extract::thread::{CommentStream, Thread};
pub use models::{Comment, Listing, ListingKind, PageParams, Profile, Quality, ThreadHeader};
pub use normalize::DELETED_BODY;
