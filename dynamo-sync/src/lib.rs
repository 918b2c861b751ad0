//! Synchronizer orchestration (section 4.4), the policy cycle that wires
//! demand refresh and Detox/Dealer into the daemon loop (section 4.6), and
//! the bounded parallel executor (section 5) both of them fan work out
//! through.

pub mod executor;
pub mod policy_cycle;
pub mod synchronizer;

pub use executor::BoundedExecutor;
pub use synchronizer::Synchronizer;
