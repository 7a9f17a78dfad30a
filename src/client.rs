//! Bindings for the remote anonymization service
//!
//! [`AnonymizationApi`] is the seam between the worker pool and the network. Each
//! method maps to exactly one HTTP request and never retries; retry and polling
//! policy live in the pipeline. [`HttpApiClient`] is the production implementation.
//!
//! | operation      | request                               |
//! |----------------|---------------------------------------|
//! | `sign_in`      | `POST {endpoint}/signin/`             |
//! | `create_task`  | `POST {endpoint}/task/`               |
//! | `upload`       | `PUT {upload_url}` (pre-signed)       |
//! | `task_status`  | `GET {endpoint}/task/{id}/status`     |
//! | `task`         | `GET {endpoint}/task/{id}`            |
//! | `fetch_result` | `GET {anonymized_url}` (pre-signed)   |

use crate::config::ServiceConfig;
use crate::error::{ApiError, Error, Result};
use crate::types::{CreatedTask, Credential, Task, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Longest response body kept in error messages
const MAX_ERROR_BODY_LEN: usize = 512;

/// Operations offered by the anonymization service
#[async_trait::async_trait]
pub trait AnonymizationApi: Send + Sync {
    /// Exchange account credentials for an access token
    ///
    /// Any failure, including transport errors, is reported as [`Error::Auth`].
    async fn sign_in(&self, username: &str, password: &str) -> Result<Credential>;

    /// Create a task for one image using the given anonymization configuration
    async fn create_task(
        &self,
        anonymization: &serde_json::Value,
        credential: &Credential,
    ) -> Result<CreatedTask>;

    /// Send the raw image bytes to the task's pre-signed upload target
    async fn upload(&self, upload_url: &str, bytes: Vec<u8>) -> Result<()>;

    /// Current status of a task
    async fn task_status(&self, task_id: &TaskId, credential: &Credential) -> Result<TaskStatus>;

    /// Full task record, including the result location once the task is done
    async fn task(&self, task_id: &TaskId, credential: &Credential) -> Result<Task>;

    /// Download the anonymized file from its pre-signed location
    async fn fetch_result(&self, anonymized_url: &str) -> Result<Vec<u8>>;
}

#[derive(Serialize)]
struct SignInRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct SignInResponse {
    #[serde(rename = "AccessToken")]
    access_token: String,
    #[serde(rename = "ExpiresIn", default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct CreateTaskResponse {
    task_id: String,
    upload_url: String,
}

#[derive(Deserialize)]
struct TaskStatusResponse {
    task_status: TaskStatus,
}

#[derive(Deserialize)]
struct TaskRecord {
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    task_status: Option<TaskStatus>,
    #[serde(default)]
    upload_url: Option<String>,
    #[serde(default)]
    anonymized_url: Option<String>,
}

/// HTTP implementation of [`AnonymizationApi`]
#[derive(Clone, Debug)]
pub struct HttpApiClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpApiClient {
    /// Create a client for the configured endpoint
    pub fn new(service: &ServiceConfig) -> Result<Self> {
        let endpoint = service.endpoint_url()?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::config(
                format!("endpoint '{}' cannot carry a path", service.endpoint),
                "service.endpoint",
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(service.request_timeout)
            .user_agent(concat!("bulk-anonymize/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http, endpoint })
    }

    /// Endpoint URL with `segments` appended as path segments
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| Error::config("endpoint cannot carry a path", "service.endpoint"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Read a response body for an error message, bounded in length
async fn error_body(response: reqwest::Response) -> String {
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY_LEN {
        let mut cut = MAX_ERROR_BODY_LEN;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}

#[async_trait::async_trait]
impl AnonymizationApi for HttpApiClient {
    async fn sign_in(&self, username: &str, password: &str) -> Result<Credential> {
        let url = self.url(&["signin", ""])?;
        let response = self
            .http
            .post(url)
            .json(&SignInRequest { username, password })
            .send()
            .await
            .map_err(|e| Error::Auth(format!("sign-in request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Auth(format!(
                "login rejected (status {}): {}",
                status.as_u16(),
                error_body(response).await
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Auth(format!("reading sign-in response failed: {}", e)))?;
        let parsed: SignInResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::Auth(format!("malformed sign-in response: {}", e)))?;

        Ok(Credential::new(
            parsed.access_token,
            parsed.expires_in.map(Duration::from_secs),
        ))
    }

    async fn create_task(
        &self,
        anonymization: &serde_json::Value,
        credential: &Credential,
    ) -> Result<CreatedTask> {
        let url = self.url(&["task", ""])?;
        let response = self
            .http
            .post(url)
            .header(reqwest::header::AUTHORIZATION, &credential.token)
            .json(anonymization)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::TaskCreate {
                status: status.as_u16(),
                body: error_body(response).await,
            }
            .into());
        }

        let parsed: CreateTaskResponse = serde_json::from_slice(&response.bytes().await?)?;
        Ok(CreatedTask {
            task_id: TaskId(parsed.task_id),
            upload_url: parsed.upload_url,
        })
    }

    async fn upload(&self, upload_url: &str, bytes: Vec<u8>) -> Result<()> {
        let response = self.http.put(upload_url).body(bytes).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Upload {
                status: status.as_u16(),
                body: error_body(response).await,
            }
            .into());
        }
        Ok(())
    }

    async fn task_status(&self, task_id: &TaskId, credential: &Credential) -> Result<TaskStatus> {
        let url = self.url(&["task", task_id.as_str(), "status"])?;
        let response = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, &credential.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::StatusQuery {
                task_id: task_id.clone(),
                status: status.as_u16(),
                body: error_body(response).await,
            }
            .into());
        }

        let parsed: TaskStatusResponse = serde_json::from_slice(&response.bytes().await?)?;
        Ok(parsed.task_status)
    }

    async fn task(&self, task_id: &TaskId, credential: &Credential) -> Result<Task> {
        let url = self.url(&["task", task_id.as_str()])?;
        let response = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, &credential.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::TaskFetch {
                task_id: task_id.clone(),
                status: status.as_u16(),
                body: error_body(response).await,
            }
            .into());
        }

        let record: TaskRecord = serde_json::from_slice(&response.bytes().await?)?;
        Ok(Task {
            id: record.task_id.map(TaskId).unwrap_or_else(|| task_id.clone()),
            status: record.task_status.unwrap_or(TaskStatus::Unknown),
            upload_url: record.upload_url,
            anonymized_url: record.anonymized_url,
        })
    }

    async fn fetch_result(&self, anonymized_url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(anonymized_url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::ResultFetch {
                status: status.as_u16(),
            }
            .into());
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(ApiError::EmptyResult.into());
        }
        Ok(bytes.to_vec())
    }
}
