//! # infra-planner
//!
//! Turns an [`Intent`](infra_core::Intent) and the current state of its
//! target into a [`Plan`](infra_core::Plan): an ordered DAG of action
//! invocations. Planning is deterministic and side-effect free.

pub mod catalog;
pub mod error;
pub mod graph;
pub mod planner;

pub use catalog::ActionCatalog;
pub use error::PlanError;
pub use planner::Planner;
