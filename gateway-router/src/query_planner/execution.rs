use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::FutureExt;
use futures::StreamExt;
use gateway_federation::FederatedSchema;
use gateway_federation::FetchNode;
use gateway_federation::QueryPlan;
use tokio::time::Instant;

use super::fetch::error_path;
use super::fetch::fetch_node;
use super::fetch::Variables;
use crate::error::FetchError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::merger;
use crate::merger::ResultFragment;
use crate::merger::ResultTree;
use crate::services::ServiceRegistry;

type StepResult = (usize, Result<Vec<ResultFragment>, FetchError>);

pub(crate) struct ExecutionParameters<'a> {
    pub(crate) schema: &'a FederatedSchema,
    pub(crate) services: &'a ServiceRegistry,
    pub(crate) variables: &'a Object,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StepState {
    Waiting,
    Running,
    Done,
    Skipped,
}

/// Runs every step of `plan`, each as soon as the steps it depends on completed.
///
/// A failed step is reported once, at its response path, and every step depending on it,
/// directly or not, is skipped. When `deadline` passes, the fetches still running are dropped and
/// whatever completed is returned.
pub(crate) async fn execute(
    plan: &QueryPlan,
    parameters: &ExecutionParameters<'_>,
    deadline: Instant,
) -> ResultTree {
    let timeout_ms = deadline
        .saturating_duration_since(Instant::now())
        .as_millis() as u64;
    let mut execution = Execution::new(plan, parameters);

    for node in plan.nodes() {
        if node.depends_on.is_empty() {
            execution.start(node);
        }
    }

    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);
    let mut deadline_exceeded = false;
    loop {
        let next = tokio::select! {
            biased;
            next = execution.in_flight.next() => next,
            _ = &mut sleep => {
                deadline_exceeded = true;
                None
            }
        };
        match next {
            Some((id, result)) => execution.complete(id, result),
            None => break,
        }
    }

    let in_flight = execution.in_flight.len();
    drop(execution.in_flight);
    let mut tree = merger::merge(execution.fragments);
    if deadline_exceeded {
        tracing::warn!(timeout_ms, in_flight, "query deadline exceeded");
        tree.errors
            .push(FetchError::DeadlineExceeded { timeout_ms }.to_graphql_error(None));
    }
    tree
}

struct Execution<'a> {
    plan: &'a QueryPlan,
    parameters: &'a ExecutionParameters<'a>,
    /// Everything fetched so far, used to build entity representations.
    data: Value,
    states: Vec<StepState>,
    pending_dependencies: Vec<usize>,
    fragments: Vec<ResultFragment>,
    in_flight: FuturesUnordered<BoxFuture<'a, StepResult>>,
}

impl<'a> Execution<'a> {
    fn new(plan: &'a QueryPlan, parameters: &'a ExecutionParameters<'a>) -> Self {
        Self {
            plan,
            parameters,
            data: Value::Null,
            states: vec![StepState::Waiting; plan.nodes().len()],
            pending_dependencies: plan
                .nodes()
                .iter()
                .map(|node| node.depends_on.len())
                .collect(),
            fragments: Vec::new(),
            in_flight: FuturesUnordered::new(),
        }
    }

    fn start(&mut self, node: &'a FetchNode) {
        if self.states[node.id] != StepState::Waiting {
            return;
        }
        let Some(service) = self.parameters.services.get(&node.service_name) else {
            self.states[node.id] = StepState::Running;
            self.complete(
                node.id,
                Err(FetchError::ValidationUnknownServiceError {
                    service: node.service_name.clone(),
                }),
            );
            return;
        };

        match Variables::new(
            node,
            self.parameters.variables,
            &self.data,
            self.parameters.schema,
        ) {
            Some(variables) => {
                tracing::debug!(step = node.id, subgraph = %node.service_name, "starting fetch");
                self.states[node.id] = StepState::Running;
                self.in_flight.push(
                    async move { (node.id, fetch_node(node, service, variables).await) }.boxed(),
                );
            }
            None => {
                tracing::debug!(step = node.id, "no entity to resolve, skipping fetch");
                self.states[node.id] = StepState::Running;
                self.complete(node.id, Ok(Vec::new()));
            }
        }
    }

    fn complete(&mut self, id: usize, result: Result<Vec<ResultFragment>, FetchError>) {
        let plan = self.plan;
        let Some(node) = plan.node(id) else {
            return;
        };
        match result {
            Ok(fragments) => {
                self.states[id] = StepState::Done;
                for fragment in fragments {
                    self.data
                        .deep_merge(Value::from_path(&fragment.path, fragment.value.clone()));
                    self.fragments.push(fragment);
                }
                for dependent in plan.dependents(id) {
                    self.pending_dependencies[dependent] -= 1;
                    if self.pending_dependencies[dependent] == 0 {
                        if let Some(dependent) = plan.node(dependent) {
                            self.start(dependent);
                        }
                    }
                }
            }
            Err(error) => {
                tracing::error!(
                    step = id,
                    subgraph = %node.service_name,
                    fetch_error = %error,
                    "fetch failed"
                );
                self.states[id] = StepState::Done;
                self.fragments.push(ResultFragment::errors(
                    id,
                    vec![error.to_graphql_error(error_path(node))],
                ));
                self.skip_dependents(id);
            }
        }
    }

    fn skip_dependents(&mut self, failed: usize) {
        let plan = self.plan;
        let mut stack = plan.dependents(failed);
        while let Some(id) = stack.pop() {
            if self.states[id] != StepState::Waiting {
                continue;
            }
            let Some(node) = plan.node(id) else {
                continue;
            };
            self.states[id] = StepState::Skipped;
            self.fragments.push(ResultFragment::errors(
                id,
                vec![FetchError::FetchSkipped {
                    service: node.service_name.clone(),
                    reason: format!("step {failed} it depends on failed"),
                }
                .to_graphql_error(error_path(node))],
            ));
            stack.extend(plan.dependents(id));
        }
    }
}
