//! lexidb-vector
//!
//! In-memory flat vector index with nearest-neighbour and MMR search, plus
//! its LanceDB-backed persistence.

pub mod index;
pub mod schema;
pub mod store;

pub use index::{l2_squared, VectorIndex};
pub use store::{IndexMeta, IndexStore};
