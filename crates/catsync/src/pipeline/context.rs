use serde::Serialize;

/// Identity of one end-to-end run for a tenant.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub client_name: String,
    pub categories: Vec<String>,
}

impl RunContext {
    pub fn new(client_name: impl Into<String>, categories: Vec<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            client_name: client_name.into(),
            categories,
        }
    }
}

/// Which sequential step a run failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStep {
    Extract,
    Transform,
}

impl std::fmt::Display for RunStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStep::Extract => write!(f, "extract"),
            RunStep::Transform => write!(f, "transform"),
        }
    }
}

/// Result of one category in the quality fan-out.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryOutcome {
    pub category: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CategoryOutcome {
    pub fn success(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            success: true,
            error: None,
        }
    }

    pub fn failure(category: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Final result of one run, as seen by the background task.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub client_name: String,
    pub success: bool,
    pub failed_step: Option<RunStep>,
    pub error: Option<String>,
    pub categories: Vec<CategoryOutcome>,
}

impl RunReport {
    pub fn completed(ctx: &RunContext, categories: Vec<CategoryOutcome>) -> Self {
        Self {
            run_id: ctx.run_id.clone(),
            client_name: ctx.client_name.clone(),
            success: true,
            failed_step: None,
            error: None,
            categories,
        }
    }

    pub fn failed(ctx: &RunContext, step: RunStep, error: String) -> Self {
        Self {
            run_id: ctx.run_id.clone(),
            client_name: ctx.client_name.clone(),
            success: false,
            failed_step: Some(step),
            error: Some(error),
            categories: Vec::new(),
        }
    }
}
