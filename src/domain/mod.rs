pub mod group;
pub mod leg;
pub mod signal;

pub use group::*;
pub use leg::*;
pub use signal::*;
