pub mod postgres;
pub mod rest_feed;

pub use postgres::{FilledLegRow, GroupPnl, PostgresStore};
pub use rest_feed::RestPriceFeed;
