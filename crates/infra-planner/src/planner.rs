//! Deterministic state-diff planner.
//!
//! For every desired attribute (sorted by name) that differs from the
//! current state, the planner picks the first declared action that moves the
//! attribute toward the target:
//!
//! - numeric attributes: an `increment` effect stepping in the right
//!   direction, repeated once per step;
//! - any attribute: a `set` effect with the desired value, or an `assign`
//!   effect.
//!
//! Preconditions are checked against a simulated state as invocations are
//! appended. The resulting invocations are wired into a DAG from their
//! declared reads/writes, `after` ordering and output bindings, then ordered
//! with Kahn's algorithm.

use crate::catalog::ActionCatalog;
use crate::error::PlanError;
use crate::graph::DependencyGraph;
use infra_core::config::PlannerConfig;
use infra_core::plan::output_ref;
use infra_core::state::values_equal;
use infra_core::{ActionDefinition, Effect, Intent, Plan, PlanNode, ResourceState};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Plans intents against an action catalog.
#[derive(Debug, Clone)]
pub struct Planner {
    max_nodes: usize,
}

/// An invocation chosen but not yet ordered.
#[derive(Debug, Clone)]
struct Draft {
    def: usize,
    inputs: Map<String, Value>,
    /// `(input field, source draft, output field)`
    bindings: Vec<(String, usize, String)>,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new(&PlannerConfig::default())
    }
}

impl Planner {
    pub fn new(config: &PlannerConfig) -> Self {
        Self {
            max_nodes: config.max_nodes,
        }
    }

    pub fn with_max_nodes(max_nodes: usize) -> Self {
        Self { max_nodes }
    }

    /// Build a plan moving `current` to `intent.desired`.
    pub fn plan<C>(
        &self,
        catalog: &C,
        intent: &Intent,
        current: &ResourceState,
    ) -> Result<Plan, PlanError>
    where
        C: ActionCatalog + ?Sized,
    {
        let defs = catalog.definitions();
        check_declared_order(&defs)?;

        let drafts = self.choose_invocations(&defs, intent, current)?;
        let graph = build_graph(&defs, &drafts);
        let order = graph.topological_order().map_err(|cycle| PlanError::CyclicDependency {
            actions: cycle_names(cycle.iter().map(|&d| defs[drafts[d].def].name.as_str())),
        })?;

        let node_ids: Vec<String> = {
            let mut ids = vec![String::new(); drafts.len()];
            for (pos, &d) in order.iter().enumerate() {
                ids[d] = format!("n{}-{}", pos + 1, defs[drafts[d].def].name);
            }
            ids
        };
        let position: Vec<usize> = {
            let mut p = vec![0; drafts.len()];
            for (pos, &d) in order.iter().enumerate() {
                p[d] = pos;
            }
            p
        };
        let preds = graph.predecessors();

        let nodes = order
            .iter()
            .map(|&d| {
                let draft = &drafts[d];
                let def = defs[draft.def];
                let mut inputs = draft.inputs.clone();
                for (input, source, output) in &draft.bindings {
                    inputs.insert(input.clone(), output_ref(&node_ids[*source], output));
                }
                let mut deps = preds[d].clone();
                deps.sort_by_key(|p| position[*p]);

                let mut node = PlanNode::new(
                    node_ids[d].clone(),
                    def.name.clone(),
                    def.version.clone(),
                    Value::Object(inputs),
                );
                node.depends_on = deps.iter().map(|p| node_ids[*p].clone()).collect();
                node
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            intent_id = %intent.intent_id,
            target = %intent.target,
            nodes = nodes.len(),
            "planned intent"
        );

        Ok(Plan::new(intent.clone(), nodes))
    }

    fn choose_invocations(
        &self,
        defs: &[&ActionDefinition],
        intent: &Intent,
        current: &ResourceState,
    ) -> Result<Vec<Draft>, PlanError> {
        let unplannable = |reason: String| PlanError::UnplannableIntent {
            intent_id: intent.intent_id.clone(),
            reason,
        };

        let mut sim = current.clone();
        let mut drafts: Vec<Draft> = Vec::new();

        for (attribute, want) in intent.desired.iter() {
            if sim.get(attribute).is_some_and(|have| values_equal(have, want)) {
                continue;
            }

            let step = Step {
                defs,
                intent,
                attribute,
                want,
                max_nodes: self.max_nodes.saturating_sub(drafts.len()),
            };
            let chosen = step
                .by_increments(&sim, &drafts)
                .or_else(|| step.by_assignment(&sim, &drafts));

            match chosen {
                Some(Ok((batch, next))) => {
                    drafts.extend(batch);
                    sim = next;
                }
                Some(Err(reason)) => return Err(unplannable(reason)),
                None => {
                    let have = sim
                        .get(attribute)
                        .map(Value::to_string)
                        .unwrap_or_else(|| "<unset>".to_string());
                    return Err(unplannable(format!(
                        "no registered action moves `{}` from {} to {}",
                        attribute, have, want
                    )));
                }
            }

            if drafts.len() > self.max_nodes {
                return Err(unplannable(format!(
                    "plan exceeds the limit of {} nodes",
                    self.max_nodes
                )));
            }
        }

        if !sim.satisfies(&intent.desired) {
            return Err(unplannable(
                "effects of the planned actions conflict with each other".to_string(),
            ));
        }

        Ok(drafts)
    }
}

/// Context for satisfying one desired attribute.
struct Step<'a> {
    defs: &'a [&'a ActionDefinition],
    intent: &'a Intent,
    attribute: &'a str,
    want: &'a Value,
    max_nodes: usize,
}

type Batch = Result<(Vec<Draft>, ResourceState), String>;

impl Step<'_> {
    fn by_increments(&self, sim: &ResourceState, prior: &[Draft]) -> Option<Batch> {
        let have = sim.get(self.attribute)?.as_i64()?;
        let want = self.want.as_i64()?;
        let delta = want - have;

        for (idx, def) in self.defs.iter().enumerate() {
            for effect in &def.effects {
                let Effect::Increment { attribute, by } = effect else {
                    continue;
                };
                if attribute != self.attribute || *by == 0 || delta.signum() != by.signum() {
                    continue;
                }
                if delta % by != 0 {
                    continue;
                }
                let steps = usize::try_from(delta / by).unwrap_or(usize::MAX);
                if steps > self.max_nodes {
                    continue;
                }
                if let Some(batch) = self.repeat(idx, steps, sim, prior) {
                    return Some(batch);
                }
            }
        }
        None
    }

    fn by_assignment(&self, sim: &ResourceState, prior: &[Draft]) -> Option<Batch> {
        for (idx, def) in self.defs.iter().enumerate() {
            let reaches = def.effects.iter().any(|effect| match effect {
                Effect::Set { attribute, value } => {
                    attribute == self.attribute && values_equal(value, self.want)
                }
                Effect::Assign { attribute } => attribute == self.attribute,
                Effect::Increment { .. } => false,
            });
            if !reaches {
                continue;
            }
            if let Some(batch) = self.repeat(idx, 1, sim, prior) {
                return Some(batch);
            }
        }
        None
    }

    /// Append `count` invocations of `defs[idx]`. Returns `None` when the
    /// action cannot reach the target (preconditions fail or another effect
    /// interferes) so the next candidate can be tried.
    fn repeat(
        &self,
        idx: usize,
        count: usize,
        sim: &ResourceState,
        prior: &[Draft],
    ) -> Option<Batch> {
        let def = self.defs[idx];
        let mut local = sim.clone();
        let mut batch: Vec<Draft> = Vec::with_capacity(count);

        for _ in 0..count {
            if !def.preconditions_hold(&local) {
                return None;
            }
            let from = local.get(self.attribute).cloned().unwrap_or(Value::Null);
            for effect in &def.effects {
                let requested = (effect.attribute() == self.attribute).then_some(self.want);
                effect.apply(&mut local, requested);
            }
            let to = local.get(self.attribute).cloned().unwrap_or(Value::Null);

            let mut inputs = Map::new();
            inputs.insert("target".into(), Value::String(self.intent.target.name.clone()));
            if let Some(kind) = &self.intent.target.kind {
                inputs.insert("kind".into(), Value::String(kind.clone()));
            }
            inputs.insert("attribute".into(), Value::String(self.attribute.to_string()));
            inputs.insert("from".into(), from);
            inputs.insert("to".into(), to);

            let mut bindings = Vec::new();
            for binding in &def.consumes {
                let own_index = prior.len() + batch.len();
                let source = batch
                    .iter()
                    .enumerate()
                    .rev()
                    .map(|(i, d)| (prior.len() + i, d))
                    .chain(prior.iter().enumerate().rev())
                    .find(|(_, d)| self.defs[d.def].name == binding.action)
                    .map(|(i, _)| i);
                match source {
                    Some(s) if s < own_index => {
                        bindings.push((binding.input.clone(), s, binding.output.clone()))
                    }
                    _ => {
                        return Some(Err(format!(
                            "`{}` consumes `{}.{}` but no earlier invocation of `{}` is planned",
                            def.name, binding.action, binding.output, binding.action
                        )));
                    }
                }
            }

            batch.push(Draft {
                def: idx,
                inputs,
                bindings,
            });
        }

        let reached = local
            .get(self.attribute)
            .is_some_and(|v| values_equal(v, self.want));
        reached.then_some(Ok((batch, local)))
    }
}

/// Reject catalogs whose declared `after` ordering is cyclic.
fn check_declared_order(defs: &[&ActionDefinition]) -> Result<(), PlanError> {
    let mut graph = DependencyGraph::new(defs.len());
    for (j, def) in defs.iter().enumerate() {
        for name in &def.after {
            for (i, other) in defs.iter().enumerate() {
                if &other.name == name && i != j {
                    graph.add_edge(i, j);
                }
            }
        }
    }
    graph
        .topological_order()
        .map(|_| ())
        .map_err(|cycle| PlanError::CyclicDependency {
            actions: cycle_names(cycle.iter().map(|&i| defs[i].name.as_str())),
        })
}

/// Conflict edges come from the latest earlier writer of each attribute an
/// invocation touches; older writers are ordered behind that one already.
fn build_graph(defs: &[&ActionDefinition], drafts: &[Draft]) -> DependencyGraph {
    let mut graph = DependencyGraph::new(drafts.len());
    let mut last_writer: HashMap<&str, usize> = HashMap::new();
    for j in 0..drafts.len() {
        let later = defs[drafts[j].def];
        for attribute in later.reads().chain(later.writes()) {
            if let Some(&i) = last_writer.get(attribute) {
                graph.add_edge(i, j);
            }
        }
        for (i, earlier_draft) in drafts.iter().enumerate().take(j) {
            let earlier = defs[earlier_draft.def];
            if later.after.contains(&earlier.name) {
                graph.add_edge(i, j);
            }
            if earlier.after.contains(&later.name) {
                graph.add_edge(j, i);
            }
        }
        for (_, source, _) in &drafts[j].bindings {
            graph.add_edge(*source, j);
        }
        for attribute in later.writes() {
            last_writer.insert(attribute, j);
        }
    }
    graph
}

/// `a -> b -> a` style listing, closing the loop.
fn cycle_names<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = names.map(str::to_string).collect();
    if let Some(first) = out.first().cloned() {
        out.push(first);
    }
    out
}
