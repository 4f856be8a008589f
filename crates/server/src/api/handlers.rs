use super::{ApiError, ApiResult};
use crate::config::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use weft_core::{
    agent::{AgentInvoker, InvocationRequest, TechniqueInfo},
    template::{self, TemplateInstance, WorkflowTemplate},
    types::{
        AgentOutput, FewShotExample, Workflow, WorkflowDefinition, WorkflowFilter, WorkflowId,
        WorkflowStatus,
    },
    workflow::compose_prompt,
    AgentError,
};

/// Step name reported for invocations made outside a workflow
const DIRECT_STEP: &str = "direct";

fn default_provider() -> String {
    "openai".to_string()
}

/// List registered techniques and providers
pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<ListAgentsResponse> {
    Json(ListAgentsResponse {
        agents: state.registry.list_techniques(),
        providers: state.registry.provider_names(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListAgentsResponse {
    pub agents: Vec<TechniqueInfo>,
    pub providers: Vec<String>,
}

/// Describe one technique
pub async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(technique): Path<String>,
) -> ApiResult<Json<TechniqueInfo>> {
    state
        .registry
        .technique(&technique)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("technique not found: {}", technique)))
}

/// Run one technique directly, outside any workflow
pub async fn process_agent(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProcessRequest>,
) -> ApiResult<Json<ProcessResponse>> {
    if state.registry.technique(&body.technique).is_none() {
        return Err(ApiError::not_found(format!(
            "technique not found: {}",
            body.technique
        )));
    }

    let request = InvocationRequest {
        step: DIRECT_STEP.to_string(),
        technique: body.technique.clone(),
        input: compose_prompt(&body.prompt, body.context.as_deref()),
        provider: body.provider.clone(),
        parameters: body.parameters,
        examples: body.examples,
    };

    let (status, output, error) = match state.registry.invoke(request).await {
        Ok(output) => (InvocationStatus::Completed, output, None),
        Err(e @ AgentError::UnknownProvider(_)) => {
            return Err(ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))
        }
        Err(e) => {
            tracing::warn!("Direct invocation of {} failed: {}", body.technique, e);
            (InvocationStatus::Failed, AgentOutput::default(), Some(e.to_string()))
        }
    };

    Ok(Json(ProcessResponse {
        technique: body.technique,
        provider: body.provider,
        status,
        output,
        error,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub technique: String,
    pub prompt: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub examples: Vec<FewShotExample>,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Completed,
    Failed,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub technique: String,
    pub provider: String,
    pub status: InvocationStatus,
    #[serde(flatten)]
    pub output: AgentOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Suggest improvements to a prompt
pub async fn prompt_feedback(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FeedbackRequest>,
) -> ApiResult<Json<FeedbackResponse>> {
    match state
        .registry
        .prompt_feedback(&body.prompt, &body.provider)
        .await
    {
        Ok(feedback) => Ok(Json(FeedbackResponse { feedback })),
        Err(e @ AgentError::UnknownProvider(_)) => {
            Err(ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))
        }
        Err(AgentError::InvalidResponse(reason)) => {
            tracing::warn!("Unusable feedback from {}: {}", body.provider, reason);
            Err(ApiError::new(
                StatusCode::BAD_GATEWAY,
                "provider returned no usable feedback",
            ))
        }
        Err(e) => {
            tracing::error!("Prompt feedback from {} failed: {}", body.provider, e);
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to generate feedback",
            ))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub prompt: String,
    #[serde(default = "default_provider")]
    pub provider: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub feedback: String,
}

/// Validate and store a new workflow
pub async fn create_workflow(
    State(state): State<Arc<AppState>>,
    Json(definition): Json<WorkflowDefinition>,
) -> ApiResult<Json<Workflow>> {
    let workflow = state.engine.validate_and_create(definition)?;
    Ok(Json(workflow))
}

/// List workflows, most recent first
pub async fn list_workflows(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<WorkflowFilter>,
) -> ApiResult<Json<ListWorkflowsResponse>> {
    let workflows = state.engine.list(filter)?;
    Ok(Json(ListWorkflowsResponse { workflows }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListWorkflowsResponse {
    pub workflows: Vec<Workflow>,
}

/// Get a specific workflow
pub async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Workflow>> {
    let workflow = state.engine.get_status(&WorkflowId::from(id))?;
    Ok(Json(workflow))
}

/// Workflows created under one session, most recent first
pub async fn session_history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionHistoryResponse>> {
    let workflows = state
        .engine
        .list(WorkflowFilter::session(session_id.as_str()))?;
    Ok(Json(SessionHistoryResponse {
        session_id,
        workflows,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionHistoryResponse {
    pub session_id: String,
    pub workflows: Vec<Workflow>,
}

/// Start executing a pending workflow in the background
pub async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkflowActionResponse>> {
    let workflow = state.engine.execute(&WorkflowId::from(id)).await?;
    tracing::info!("Started workflow execution: workflow_id={}", workflow.id);

    Ok(Json(WorkflowActionResponse {
        workflow_id: workflow.id,
        status: workflow.status,
        message: "Workflow execution started".to_string(),
    }))
}

/// Request cancellation of a workflow
pub async fn cancel_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkflowActionResponse>> {
    let workflow = state.engine.cancel(&WorkflowId::from(id)).await?;

    let message = if workflow.is_terminal() {
        "Workflow cancelled"
    } else {
        "Cancellation requested"
    };
    Ok(Json(WorkflowActionResponse {
        workflow_id: workflow.id,
        status: workflow.status,
        message: message.to_string(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkflowActionResponse {
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    pub message: String,
}

/// List the built-in workflow templates
pub async fn list_templates() -> Json<ListTemplatesResponse> {
    Json(ListTemplatesResponse {
        templates: template::builtin_templates(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListTemplatesResponse {
    pub templates: Vec<WorkflowTemplate>,
}

/// Create a pending workflow from a template
pub async fn instantiate_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(instance): Json<TemplateInstance>,
) -> ApiResult<Json<Workflow>> {
    let template = template::find_template(&id)
        .ok_or_else(|| ApiError::not_found(format!("template not found: {}", id)))?;
    let workflow = state
        .engine
        .validate_and_create(template.instantiate(instance))?;

    tracing::info!("Instantiated template {} as workflow {}", id, workflow.id);
    Ok(Json(workflow))
}
