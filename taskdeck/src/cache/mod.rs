//! Client-side query cache.
//!
//! [`QueryCache`] is the single process-wide store of server state, keyed
//! by hierarchical [`CacheKey`]s. Reads go through [`QueryClient`]; writes
//! come only from the mutation coordinator and the push invalidator.

pub mod key;
pub mod query;
pub mod store;

pub use key::CacheKey;
pub use query::{QueryClient, Revalidator};
pub use store::{CachedValue, FetchTicket, Freshness, MutationHold, QueryCache, Snapshot};
