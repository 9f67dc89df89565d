pub mod risk_offset;
pub mod take_profit;

pub use risk_offset::{select_worst_loser, RiskOffsetConfig, RiskOffsetEngine, RiskOffsetStats};
pub use take_profit::{
    exit_basis, tp_breached, TakeProfitConfig, TakeProfitMonitor, TakeProfitStats,
};
