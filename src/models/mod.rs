pub mod gas;
pub mod pool;
pub mod quote;

pub use gas::{GasEstimate, GasSnapshot};
pub use pool::{BridgePool, PoolsSnapshot, SwapPair};
pub use quote::{QuoteSnapshot, TokenQuote};
