//! # infra-runtime
//!
//! Everything that turns an accepted intent into effects on infrastructure:
//!
//! - [`ActionRegistry`]: the immutable catalog of [`Action`] capabilities
//! - [`Executor`]: runs a plan's nodes concurrently, with retries, timeouts
//!   and write-ahead status recording
//! - [`RollbackCoordinator`]: compensates succeeded nodes after a failure
//! - [`Agent`]: the facade used by the server and the CLI
//! - [`SimulatedCluster`]: built-in cluster actions backed by process memory
//!
//! ## Execution flow
//!
//! ```text
//! Intent -> Planner (Registry + Inventory) -> Plan
//!        -> Executor (State Tracker, Actions)
//!        -> on failure: Rollback Coordinator
//!        -> Reporter
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use infra_core::{AgentConfig, Intent};
//! use infra_runtime::{Agent, SimulatedCluster};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = Arc::new(SimulatedCluster::new());
//! cluster.seed("cache-cluster-1", "scaled_to=3".parse()?);
//!
//! let agent = Agent::from_config(&AgentConfig::default(), cluster.registry()?, cluster.clone())?;
//! let intent = Intent::new("cache-cluster-1", "scaled_to=6".parse()?);
//! let report = agent.run_intent(intent).await?;
//! println!("{}", report.outcome);
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod agent;
pub mod builtin;
pub mod error;
pub mod executor;
pub mod idempotency;
pub mod inventory;
pub mod registry;
pub mod retry;
pub mod rollback;

pub use action::{Action, InvocationContext};
pub use agent::Agent;
pub use builtin::{Fault, FaultKind, SimulatedCluster};
pub use error::{ActionError, AgentError, ExecutionError, InventoryError, RegistryError};
pub use executor::Executor;
pub use inventory::{Inventory, StaticInventory};
pub use registry::ActionRegistry;
pub use retry::RetryPolicy;
pub use rollback::{RollbackCoordinator, RollbackSummary};
