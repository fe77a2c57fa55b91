use crate::error::{ApiError, Result, message_from_body};
use crate::models;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use url::Url;

/// Thin typed client over the MailForge REST API.
///
/// The bearer token is shared between clones, so logging in on one handle
/// authenticates every background task holding another.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .map_err(|e| ApiError::validation(format!("Invalid API URL {}: {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::validation(format!(
                "API URL must be http or https: {}",
                base_url
            )));
        }

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    pub async fn has_token(&self) -> bool {
        self.token.read().await.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authed(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.http.request(method, self.url(path));
        match self.token.read().await.as_deref() {
            Some(token) => req.bearer_auth(token),
            None => {
                warn!("No access token found for API request to {}", path);
                req
            }
        }
    }

    /// Send a request and turn non-2xx responses into `ApiError`.
    ///
    /// For authenticated calls a 401/403 short-circuits to
    /// `ApiError::Unauthorized` without reading the body.
    async fn send(&self, req: RequestBuilder, path: &str, authenticated: bool) -> Result<Response> {
        let resp = req.send().await.map_err(|e| {
            warn!("Request to {} failed: {}", path, e);
            ApiError::Transport(e)
        })?;
        let status = resp.status();
        debug!("{} -> {}", path, status.as_u16());

        if status.is_success() {
            return Ok(resp);
        }

        if authenticated && matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            warn!("{} rejected the session ({})", path, status.as_u16());
            return Err(ApiError::Unauthorized);
        }

        let body = resp.bytes().await.unwrap_or_default();
        let message = message_from_body(&body);
        warn!(
            "{} failed with {}: {}",
            path,
            status.as_u16(),
            message.as_deref().unwrap_or("<no detail>")
        );
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let req = self.authed(Method::GET, path).await;
        let resp = self.send(req, path, true).await?;
        Self::decode(resp).await
    }

    // ---- auth ----

    pub async fn login(&self, email: &str, password: &str) -> Result<models::LoginResponse> {
        let path = "/auth/login";
        let params = [
            ("username", email),
            ("password", password),
            ("grant_type", "password"),
        ];
        let req = self.http.post(self.url(path)).form(&params);
        let resp = self.send(req, path, false).await?;
        Self::decode(resp).await
    }

    pub async fn register(&self, body: &models::RegisterRequest) -> Result<models::RegisterResponse> {
        let path = "/auth/register";
        let req = self.http.post(self.url(path)).json(body);
        let resp = self.send(req, path, false).await?;
        Self::decode(resp).await
    }

    pub async fn me(&self) -> Result<models::User> {
        self.get_json("/me").await
    }

    // ---- datasets ----

    pub async fn list_datasets(&self, page: u32, page_size: u32) -> Result<Vec<models::Dataset>> {
        let path = format!("/datasets?page={}&page_size={}", page, page_size);
        let page: models::DatasetPage = self.get_json(&path).await?;
        Ok(page.data)
    }

    pub async fn get_dataset(&self, id: i64) -> Result<models::Dataset> {
        self.get_json(&format!("/datasets/{}", id)).await
    }

    pub async fn preview_dataset(&self, id: i64) -> Result<models::DatasetPreview> {
        self.get_json(&format!("/datasets/preview/{}", id)).await
    }

    /// Stream a CSV file to `POST /datasets/`, calling `on_progress` with
    /// `(bytes_sent, total_bytes)` as chunks are handed to the transport.
    pub async fn upload_dataset<F>(
        &self,
        file: &Path,
        email_column: &str,
        name: &str,
        mut on_progress: F,
    ) -> Result<models::UploadedDataset>
    where
        F: FnMut(u64, u64) + Send + 'static,
    {
        let path = "/datasets/";
        let handle = tokio::fs::File::open(file).await?;
        let total = handle.metadata().await?.len();
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset.csv".to_string());

        let mut sent = 0u64;
        let stream = ReaderStream::new(handle).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                on_progress(sent, total);
            }
            chunk
        });

        let part = Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(file_name)
            .mime_str("text/csv")?;
        let form = Form::new()
            .part("file", part)
            .text("email_column", email_column.to_string())
            .text("name", name.to_string());

        debug!("Uploading {} ({} bytes)", file.display(), total);
        let req = self.authed(Method::POST, path).await.multipart(form);
        let resp = self.send(req, path, true).await?;
        Self::decode(resp).await
    }

    // ---- email accounts ----

    pub async fn list_email_accounts(&self) -> Result<Vec<models::EmailAccount>> {
        self.get_json("/email-accounts").await
    }

    pub async fn delete_email_account(&self, id: i64) -> Result<()> {
        let path = format!("/email-accounts/{}", id);
        let req = self.authed(Method::DELETE, &path).await;
        self.send(req, &path, true).await?;
        Ok(())
    }

    pub async fn gmail_auth_url(&self) -> Result<Option<String>> {
        let resp: models::GmailAuthUrl = self.get_json("/email-accounts/gmail/auth-url").await?;
        Ok(resp.auth_url.filter(|u| !u.is_empty()))
    }

    pub async fn connect_sendgrid(
        &self,
        body: &models::SendgridAccountCreate,
    ) -> Result<models::ConnectedAccount> {
        let path = "/email-accounts/sendgrid";
        let req = self.authed(Method::POST, path).await.json(body);
        let resp = self.send(req, path, true).await?;
        Self::decode(resp).await
    }

    pub async fn update_sendgrid_credentials(&self, id: i64, api_key: &str) -> Result<()> {
        let path = format!("/email-accounts/sendgrid/{}/credentials", id);
        let body = models::SendgridCredentials {
            api_key: api_key.to_string(),
        };
        let req = self.authed(Method::POST, &path).await.json(&body);
        self.send(req, &path, true).await?;
        Ok(())
    }

    // ---- campaigns ----

    pub async fn generate_template(
        &self,
        user_prompt: &str,
        columns: &[String],
    ) -> Result<models::GeneratedTemplate> {
        let path = "/llm/generate-template";
        let body = models::GenerateTemplateRequest {
            user_prompt: user_prompt.to_string(),
            columns: columns.to_vec(),
        };
        let req = self.authed(Method::POST, path).await.json(&body);
        let resp = self.send(req, path, true).await?;
        Self::decode(resp).await
    }

    pub async fn create_email_job(&self, job: &models::CreateEmailJob) -> Result<models::JobCreated> {
        let path = "/email-jobs/";
        let req = self.authed(Method::POST, path).await.json(job);
        let resp = self.send(req, path, true).await?;
        Self::decode(resp).await
    }
}
