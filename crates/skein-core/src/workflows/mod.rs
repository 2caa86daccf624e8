//! The two pipeline workflows: planning and job execution.
//!
//! Both are registered under stable names so a replacement process can
//! resume runs it did not start.

pub mod planner;
pub mod worker;

use crate::state::WorkflowDeps;
use crate::workflow::WorkflowEngine;

pub const PLANNER_WORKFLOW: &str = "plan";
pub const WORKER_WORKFLOW: &str = "handle-job";

pub fn register_all(engine: &WorkflowEngine, deps: &WorkflowDeps) {
    let d = deps.clone();
    engine.register(PLANNER_WORKFLOW, move |ctx, args| {
        let d = d.clone();
        async move { planner::plan(ctx, d, args).await }
    });

    let d = deps.clone();
    engine.register(WORKER_WORKFLOW, move |ctx, args| {
        let d = d.clone();
        async move { worker::handle_job(ctx, d, args).await }
    });
}
