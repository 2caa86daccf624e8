//! The worker workflow: prepare a job, then drive the codegen agent through
//! sandbox execution until it reports completion.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::DurableAgent;
use crate::error::ServerError;
use crate::models::job::{Job, JobStatus};
use crate::models::message::ChatMessage;
use crate::models::spec::{Spec, SpecType};
use crate::state::WorkflowDeps;
use crate::tools::{ToolExecutor, ToolName};
use crate::workflow::{WorkflowCtx, WorkflowError};

pub const WORKER_SYSTEM: &str = "\
You are an engineering worker AI that processes job requests to edit and apply code in the \
repositories you have access to, based off of a specification. You'll be given a full-featured \
implementation specification for the job, as well as environment context. Your task is to process \
the specification in a sandbox environment and apply the changes to the repository.

The detailed workflow is as follows:
1. Initialize a sandbox environment for the job. The environment has an AI agent installed in the \
CLI; your cli_query tool is your primary interface to it.
2. Check for the existence of the implementation branch on the repository. If it doesn't exist, \
create it based off of main. Checkout the branch to prepare for implementation.
3. Pass the specification to the CLI agent, word for word, to generate and apply the changes. Ask \
it to create and push the commit after the changes are made. You are only allowed to apply once.
4. Determine from the specification whether this is a new feature or an update, and create a PR \
only for an initial specification.
5. Report your completion of the task.

Execute these steps in order and return the results. Be concise and focused on completing the \
workflow.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobArgs {
    pub job_id: String,
}

/// Output of the prepare step; everything the agent phase needs, as plain
/// data so it replays cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedJob {
    pub job: Job,
    pub spec: Spec,
}

/// Deterministic feature branch for a spec: a pure function of the spec id,
/// so re-running the prepare step recomputes the same value.
pub fn derive_feature_branch(spec: &Spec) -> String {
    let prefix: String = spec.id.chars().take(8).collect();
    format!("feat/autogen-{}", prefix)
}

pub async fn handle_job(
    ctx: Arc<WorkflowCtx>,
    deps: WorkflowDeps,
    args: Value,
) -> Result<Value, WorkflowError> {
    let JobArgs { job_id } = serde_json::from_value(args)?;
    let result = run_job(&ctx, &deps, &job_id).await;

    if let Err(e) = &result {
        // Job → failed wherever a job context exists; a missing job has
        // nothing to transition.
        if let Ok(Some(_)) = deps.jobs.get(&job_id).await {
            if let Err(update_err) = deps
                .jobs
                .update_status(&job_id, JobStatus::Failed, Some(e.to_string()))
                .await
            {
                tracing::error!(job = %job_id, error = %update_err, "failed to record job failure");
            }
        }
    }

    result
}

async fn run_job(
    ctx: &Arc<WorkflowCtx>,
    deps: &WorkflowDeps,
    job_id: &str,
) -> Result<Value, WorkflowError> {
    let d = deps.clone();
    let prep: PreparedJob = ctx
        .step("prepare-job", job_id.to_string(), move |id| async move {
            tracing::info!(job = %id, "processing job");

            let mut job = d
                .jobs
                .get(&id)
                .await?
                .ok_or_else(|| ServerError::NotFound(format!("Job {} not found", id)))?;
            let mut spec = d.specs.get(&job.spec_id).await?.ok_or_else(|| {
                ServerError::NotFound(format!("Spec {} not found for job {}", job.spec_id, job.id))
            })?;

            d.jobs.update_status(&job.id, JobStatus::Apply, None).await?;
            job.status = JobStatus::Apply;

            // Update specs reuse their branch verbatim; initial specs derive
            // one from the spec id.
            let branch = match (spec.spec_type, spec.branch.as_deref()) {
                (SpecType::Update, Some(b)) if !b.is_empty() => b.to_string(),
                _ => derive_feature_branch(&spec),
            };
            d.specs.set_branch(&spec.id, &branch).await?;
            d.jobs.set_branch(&job.id, &branch).await?;
            spec.branch = Some(branch.clone());
            job.branch = Some(branch);

            Ok(PreparedJob { job, spec })
        })
        .await?;

    let executor = ToolExecutor::worker(deps.clone(), prep.job.id.clone());
    let agent = DurableAgent {
        model: deps.config.codegen_model.clone(),
        system: WORKER_SYSTEM.to_string(),
    };
    let messages = vec![ChatMessage::user(format!(
        "ENVIRONMENT_CONTEXT:\n\
         Spec Repository: {}\n\
         Spec Type: {}\n\
         Spec Implementation Branch: {}\n\n\
         SPEC CONTENT:\n{}",
        prep.spec.repo,
        prep.spec.spec_type.as_str(),
        prep.spec.branch.as_deref().unwrap_or(""),
        prep.spec.content,
    ))];

    let outcome = agent
        .run(
            ctx,
            &executor,
            messages,
            ToolName::ReportCompletion,
            deps.config.max_agent_turns,
        )
        .await?;

    let d = deps.clone();
    ctx.step("complete-job", prep.job.id.clone(), move |id| async move {
        d.jobs.update_status(&id, JobStatus::Complete, None).await?;
        Ok(serde_json::json!({ "completed": true }))
    })
    .await?;

    tracing::info!(job = %prep.job.id, turns = outcome.turns, "job completed");
    Ok(serde_json::json!({
        "jobId": prep.job.id,
        "turns": outcome.turns,
    }))
}
