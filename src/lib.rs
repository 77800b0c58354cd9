//! planet: a feed aggregator.
//!
//! Polls a set of RSS/Atom feeds, keeps their entries in a disk-backed cache
//! that survives failed fetches, and merges everything into one deterministic,
//! paginated, newest-first timeline for a themed renderer.
//!
//! ```text
//! Config → FeedSource* → Aggregator ─┬─ Fetcher → Parser → Cache.update   (per feed, bounded pool)
//!                                    └─ Cache → merge/sort → pages → Renderer
//! ```

pub mod aggregate;
pub mod check;
pub mod config;
pub mod feed;
pub mod render;
pub mod storage;
pub mod util;
