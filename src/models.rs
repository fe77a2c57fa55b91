use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl DatasetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetStatus::Processing => "processing",
            DatasetStatus::Completed => "completed",
            DatasetStatus::Failed => "failed",
            DatasetStatus::Unknown => "unknown",
        }
    }
}

/// A dataset as returned by the list (`GET /datasets`) and detail
/// (`GET /datasets/{id}`) endpoints. The two shapes overlap, so every field
/// besides the id and name is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub email_column: Option<String>,
    #[serde(default)]
    pub json_schema: Vec<String>,
    #[serde(default)]
    pub rows: Option<i64>,
    #[serde(default)]
    pub status: Option<DatasetStatus>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default, rename = "type")]
    pub source_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetPage {
    #[serde(default)]
    pub data: Vec<Dataset>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetPreview {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub json_schema: Vec<String>,
    /// Row objects keyed by column name.
    #[serde(default)]
    pub rows: Vec<Value>,
}

impl DatasetPreview {
    /// Flatten the preview rows into display cells ordered by `json_schema`.
    pub fn cells(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| row_cells(row, &self.json_schema))
            .collect()
    }
}

fn row_cells(row: &Value, columns: &[String]) -> Vec<String> {
    match row {
        Value::Object(map) => columns
            .iter()
            .map(|c| map.get(c).map(cell_text).unwrap_or_default())
            .collect(),
        Value::Array(items) => items.iter().map(cell_text).collect(),
        other => vec![cell_text(other)],
    }
}

pub fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadedDataset {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email_column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gmail,
    Sendgrid,
    #[serde(other)]
    Other,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gmail => "gmail",
            Provider::Sendgrid => "sendgrid",
            Provider::Other => "other",
        }
    }
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAccount {
    pub id: i64,
    pub email_address: String,
    pub provider: Provider,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendgridConfig {
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendgridAccountCreate {
    pub provider: Provider,
    pub email_address: String,
    pub name: String,
    pub config: SendgridConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendgridCredentials {
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectedAccount {
    pub email_address: String,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GmailAuthUrl {
    #[serde(default)]
    pub auth_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateTemplateRequest {
    pub user_prompt: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GeneratedTemplate {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Body of `POST /email-jobs/`. `scheduled_at` serializes as `null` for
/// "send immediately".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateEmailJob {
    pub dataset_id: i64,
    pub email_account_id: i64,
    pub subject_template: String,
    pub prompt_template: String,
    pub scheduled_at: Option<String>,
    pub throttle_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobCreated {
    pub job_id: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    pub id: Value,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisteredUser {
    #[serde(default)]
    pub email: Option<String>,
}

/// `POST /auth/register` replies either with the user at the top level or
/// nested under `user`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user: Option<RegisteredUser>,
}

impl RegisterResponse {
    pub fn email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .or_else(|| self.user.as_ref().and_then(|u| u.email.as_deref()))
    }
}
