//! The State Tracker.
//!
//! Writes go to the store first and to the in-memory cache second, so a
//! cached status is always one that survived a durable write. Writes for the
//! same `(plan, node)` pair are serialized; writes for different nodes of the
//! same plan only contend while a sequence number is allocated.

use crate::error::StateError;
use crate::journal::{self, EntryKind, JournalEntry, NodeUpdate};
use crate::store::StateStore;
use chrono::Utc;
use infra_core::{ExecutionRecord, NodeStatus, Plan, PlanOutcome};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

struct PlanJournal {
    record: ExecutionRecord,
    next_seq: u64,
}

type NodeKey = (Uuid, String);

/// Records plan and node state transitions durably.
pub struct StateTracker {
    store: Arc<dyn StateStore>,
    plans: RwLock<HashMap<Uuid, Arc<Mutex<PlanJournal>>>>,
    node_locks: std::sync::Mutex<HashMap<NodeKey, Arc<Mutex<()>>>>,
}

impl StateTracker {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            plans: RwLock::new(HashMap::new()),
            node_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Persist a new plan with every node pending. If the plan is already
    /// journaled, the existing record is returned unchanged.
    pub async fn begin(&self, plan: &Plan) -> Result<ExecutionRecord, StateError> {
        if let Some(existing) = self.load(plan.plan_id).await? {
            return Ok(existing);
        }

        let entry = JournalEntry {
            plan_id: plan.plan_id,
            seq: 0,
            at: Utc::now(),
            kind: EntryKind::PlanCreated {
                plan: Box::new(plan.clone()),
            },
        };
        self.store.append(&entry).await?;

        let mut record = None;
        journal::apply(&mut record, &entry)?;
        let record = record.ok_or(StateError::UnknownPlan(plan.plan_id))?;

        let mut plans = self.plans.write().await;
        let journal = plans.entry(plan.plan_id).or_insert_with(|| {
            Arc::new(Mutex::new(PlanJournal {
                record: record.clone(),
                next_seq: 1,
            }))
        });
        let snapshot = journal.lock().await.record.clone();
        tracing::debug!(plan_id = %plan.plan_id, nodes = plan.len(), "Plan journaled");
        Ok(snapshot)
    }

    /// Durably record a node transition. Backwards transitions are rejected
    /// before anything is written.
    pub async fn record(&self, plan_id: Uuid, update: NodeUpdate) -> Result<(), StateError> {
        let node_lock = self.node_lock(plan_id, &update.node_id)?;
        let _guard = node_lock.lock().await;

        let journal = self.journal(plan_id).await?;
        let entry = {
            let mut j = journal.lock().await;
            let current = j
                .record
                .nodes
                .get(&update.node_id)
                .map(|n| n.status)
                .ok_or_else(|| StateError::UnknownNode {
                    plan_id,
                    node_id: update.node_id.clone(),
                })?;
            if !current.can_transition_to(update.status) {
                return Err(StateError::InvalidTransition {
                    plan_id,
                    node_id: update.node_id.clone(),
                    from: current,
                    to: update.status,
                });
            }
            let seq = j.next_seq;
            j.next_seq += 1;
            JournalEntry {
                plan_id,
                seq,
                at: Utc::now(),
                kind: EntryKind::NodeUpdated(update),
            }
        };

        self.store.append(&entry).await?;

        let mut j = journal.lock().await;
        let mut record = Some(j.record.clone());
        journal::apply(&mut record, &entry)?;
        if let Some(record) = record {
            j.record = record;
        }
        if let EntryKind::NodeUpdated(update) = &entry.kind {
            tracing::trace!(%plan_id, node_id = %update.node_id, status = %update.status, "Node transition recorded");
        }
        Ok(())
    }

    /// Convenience for a bare status change with an optional output.
    pub async fn set_status(
        &self,
        plan_id: Uuid,
        node_id: &str,
        status: NodeStatus,
        output: Option<Value>,
    ) -> Result<(), StateError> {
        let mut update = NodeUpdate::new(node_id, status);
        update.output = output;
        self.record(plan_id, update).await
    }

    /// Record the plan's final outcome. Recording the same outcome twice is
    /// a no-op; a different one is rejected.
    ///
    /// A finished plan is dropped from the cache along with its node locks;
    /// later reads replay it from the store.
    pub async fn finish(&self, plan_id: Uuid, outcome: PlanOutcome) -> Result<(), StateError> {
        let journal = self.journal(plan_id).await?;
        let mut j = journal.lock().await;
        match j.record.outcome {
            Some(existing) if existing == outcome => {
                drop(j);
                return self.forget(plan_id).await;
            }
            Some(_) => return Err(StateError::AlreadyFinished(plan_id)),
            None => {}
        }
        let entry = JournalEntry {
            plan_id,
            seq: j.next_seq,
            at: Utc::now(),
            kind: EntryKind::PlanFinished { outcome },
        };
        self.store.append(&entry).await?;
        j.next_seq += 1;
        let mut record = Some(j.record.clone());
        journal::apply(&mut record, &entry)?;
        if let Some(record) = record {
            j.record = record;
        }
        drop(j);
        tracing::debug!(%plan_id, %outcome, "Plan outcome recorded");
        self.forget(plan_id).await
    }

    async fn forget(&self, plan_id: Uuid) -> Result<(), StateError> {
        self.plans.write().await.remove(&plan_id);
        self.node_locks
            .lock()
            .map_err(|e| StateError::Persistence(format!("node lock table poisoned: {e}")))?
            .retain(|(id, _), _| *id != plan_id);
        Ok(())
    }

    /// Number of plans held in memory.
    pub async fn cached_plans(&self) -> usize {
        self.plans.read().await.len()
    }

    /// The record for a plan, replaying its journal on first access.
    pub async fn load(&self, plan_id: Uuid) -> Result<Option<ExecutionRecord>, StateError> {
        if let Some(journal) = self.plans.read().await.get(&plan_id).cloned() {
            return Ok(Some(journal.lock().await.record.clone()));
        }

        let entries = self.store.load(plan_id).await?;
        let next_seq = entries.iter().map(|e| e.seq + 1).max().unwrap_or(0);
        let Some(record) = journal::replay(entries)? else {
            return Ok(None);
        };

        let mut plans = self.plans.write().await;
        let journal = plans.entry(plan_id).or_insert_with(|| {
            Arc::new(Mutex::new(PlanJournal { record, next_seq }))
        });
        let snapshot = journal.lock().await.record.clone();
        Ok(Some(snapshot))
    }

    /// Like [`load`](Self::load) but an unknown plan is an error.
    pub async fn snapshot(&self, plan_id: Uuid) -> Result<ExecutionRecord, StateError> {
        self.load(plan_id)
            .await?
            .ok_or(StateError::UnknownPlan(plan_id))
    }

    /// Every journaled plan id.
    pub async fn plan_ids(&self) -> Result<Vec<Uuid>, StateError> {
        self.store.plan_ids().await
    }

    /// Every journaled record, oldest first.
    pub async fn list(&self) -> Result<Vec<ExecutionRecord>, StateError> {
        let mut records = Vec::new();
        for id in self.plan_ids().await? {
            if let Some(record) = self.load(id).await? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    /// Output of a succeeded invocation with this idempotency key, if any.
    pub async fn succeeded_output(
        &self,
        plan_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<Value>, StateError> {
        Ok(self
            .load(plan_id)
            .await?
            .and_then(|r| r.succeeded_output(idempotency_key).cloned()))
    }

    async fn journal(&self, plan_id: Uuid) -> Result<Arc<Mutex<PlanJournal>>, StateError> {
        if self.load(plan_id).await?.is_none() {
            return Err(StateError::UnknownPlan(plan_id));
        }
        self.plans
            .read()
            .await
            .get(&plan_id)
            .cloned()
            .ok_or(StateError::UnknownPlan(plan_id))
    }

    fn node_lock(&self, plan_id: Uuid, node_id: &str) -> Result<Arc<Mutex<()>>, StateError> {
        let mut locks = self
            .node_locks
            .lock()
            .map_err(|e| StateError::Persistence(format!("node lock table poisoned: {e}")))?;
        Ok(locks
            .entry((plan_id, node_id.to_string()))
            .or_default()
            .clone())
    }
}
