pub mod merge;
pub mod poller;
pub mod store;

pub use poller::{Poller, PollerStats};
