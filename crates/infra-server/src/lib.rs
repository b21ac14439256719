//! # infra-server
//!
//! HTTP surface of the infra-agent.
//!
//! | Method | Path | |
//! |--------|------|-|
//! | GET | `/healthz/live`, `/healthz/ready` | probes |
//! | POST | `/intents` | plan an intent and start executing it |
//! | GET | `/plans`, `/plans/{id}` | journaled plans and their execution records |
//! | POST | `/plans/{id}/cancel` | cancel an active run |
//! | GET | `/actions` | registered action definitions |
//! | POST | `/webhooks/grafana` | turn firing Grafana alerts into intents |
//!
//! Submission answers as soon as the plan is journaled; execution runs on
//! a background task and its outcome goes to the configured report sink.

pub mod error;
pub mod grafana;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;

pub use error::ServerError;
pub use routes::create_router;
pub use server::AgentServer;
pub use state::AppState;
