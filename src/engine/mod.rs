pub mod admission;
pub mod closure;
pub mod lifecycle;
pub mod queue;

pub use admission::{decide, AdmissionController, AdmissionDecision, AdmissionOutcome};
pub use closure::{AllLegsExited, ClosurePolicy};
pub use lifecycle::{
    unrealized_pnl_percent, unrealized_pnl_usd, weighted_average_entry, LifecycleEngine,
};
pub use queue::{replay_ordering, FifoPriority, PriorityStrategy, QueueManager};
