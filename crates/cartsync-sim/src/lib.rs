pub mod fault;
pub mod invariants;
pub mod ops;
pub mod oracle;
pub mod sim;

pub use fault::{FaultConfig, FaultStats, FaultyCartService};
pub use invariants::Violation;
pub use sim::{Sim, SimConfig, SimReport};
