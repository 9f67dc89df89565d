pub mod adapters;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod market;
pub mod services;
pub mod validation;

pub use adapters::{FilledLegRow, GroupPnl, PostgresStore, RestPriceFeed};
pub use config::AppConfig;
pub use domain::{
    DcaLeg, GroupStatus, LegSpec, LegStatus, PositionGroup, Pyramid, QueueStatus, QueuedSignal,
    TakeProfitMode, TradeSignal,
};
pub use engine::{
    AdmissionController, AdmissionDecision, AdmissionOutcome, AllLegsExited, ClosurePolicy,
    FifoPriority, LifecycleEngine, PriorityStrategy, QueueManager,
};
pub use error::{GridError, Result};
pub use market::{MarketData, PrecisionRules};
pub use services::{
    RiskOffsetConfig, RiskOffsetEngine, RiskOffsetStats, TakeProfitConfig, TakeProfitMonitor,
    TakeProfitStats,
};
