pub mod traits;

pub use traits::{MarketData, PrecisionRules};

#[cfg(test)]
pub use traits::MockMarketData;
