//! Port implementations connecting the subsystems.

pub mod chain_index;
pub mod chain_source;

pub use chain_index::ChainDbAdapter;
pub use chain_source::ChainClientAdapter;
