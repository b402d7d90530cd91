//! CLI command implementations.

pub mod common;
mod index;
mod locks;
mod reset;
mod search;
mod stats;

pub use index::index;
pub use locks::locks;
pub use reset::reset;
pub use search::search;
pub use stats::stats;
