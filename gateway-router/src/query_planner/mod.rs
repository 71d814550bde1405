//! Planning and execution of client operations.

use gateway_federation::FederatedSchema;
use gateway_federation::QueryPlan;
use gateway_federation::QueryPlanner;

pub(crate) use self::execution::execute;
pub(crate) use self::execution::ExecutionParameters;
use crate::error::QueryPlannerError;
use crate::graphql::Request;

mod execution;
pub(crate) mod fetch;
mod selection;

pub(crate) const PLAN_SPAN_NAME: &str = "query_planning";
pub(crate) const EXECUTION_SPAN_NAME: &str = "execution";
pub(crate) const FETCH_SPAN_NAME: &str = "fetch";

/// Validates the operation of `request` and plans it against `schema`.
pub(crate) fn plan_request(
    schema: &FederatedSchema,
    request: &Request,
) -> Result<QueryPlan, QueryPlannerError> {
    let query = request
        .query
        .as_deref()
        .ok_or(QueryPlannerError::MissingQuery)?;
    let _span = tracing::info_span!(PLAN_SPAN_NAME).entered();
    let plan = QueryPlanner::new(schema).plan(
        query,
        request.operation_name.as_deref(),
        &request.variables,
    )?;
    tracing::debug!(steps = plan.nodes().len(), "query plan:\n{plan}");
    Ok(plan)
}
