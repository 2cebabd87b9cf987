/// Key/value stores with optional time-based expiry
pub mod ttl_cache;

pub use ttl_cache::{Expiry, TtlCache};
