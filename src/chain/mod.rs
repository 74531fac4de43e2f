//! Chain state reads with block- and cycle-scoped caching

pub mod cache;
pub mod context;
pub mod ttl;

pub use cache::{CacheKey, CachePort, TtlCache};
pub use context::ChainContext;
