//! Volatility Profile Store, Change Log, and Match Cache
//! (SPEC_FULL §4.11-§4.13): three small KV-shaped interfaces fronted
//! by in-memory bounded implementations, with an optional Redis
//! backend behind the `redis-store` feature. Grounded on
//! `portable_orchestrator_v5/core/scraping_frequency_optimizer.py`
//! and `intelligent_cache_manager.py`'s equivalent stores.

mod change_log;
mod match_cache;
pub(crate) mod volatility;

pub use change_log::{ChangeLog, InMemoryChangeLog};
pub use match_cache::{InMemoryMatchCache, MatchCache};
pub use volatility::{InMemoryVolatilityStore, VolatilityStore};

#[cfg(feature = "redis-store")]
mod redis_backend;
#[cfg(feature = "redis-store")]
pub use redis_backend::{RedisChangeLog, RedisMatchCache, RedisVolatilityStore};
