//! In-process stand-in for the anonymization service built on wiremock

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// Prefix the mock puts in front of every uploaded image
pub const ANONYMIZED_PREFIX: &[u8] = b"anonymized:";

#[derive(Default)]
struct ServiceState {
    sign_ins: AtomicU64,
    created: AtomicU64,
    polls: Mutex<HashMap<String, u32>>,
    uploads: Mutex<HashMap<String, Vec<u8>>>,
}

/// Path segment `index` of the request URL
fn segment(request: &Request, index: usize) -> String {
    request
        .url
        .path_segments()
        .and_then(|mut segments| segments.nth(index))
        .unwrap_or_default()
        .to_string()
}

/// Scriptable behaviour of the mock service
#[derive(Clone, Copy, Debug)]
pub struct ServiceBehaviour {
    /// Reject every sign-in with 401
    pub reject_sign_in: bool,
    /// Status polls answered with `processing` before `done`
    pub polls_until_done: u32,
    /// Status polls per task answered with 503 before any real answer
    pub status_errors: u32,
}

impl Default for ServiceBehaviour {
    fn default() -> Self {
        Self {
            reject_sign_in: false,
            polls_until_done: 1,
            status_errors: 0,
        }
    }
}

/// Running mock service
pub struct MockService {
    pub server: MockServer,
    state: Arc<ServiceState>,
}

impl MockService {
    /// Start a service that completes every task on the first poll
    pub async fn start() -> Self {
        Self::start_with(ServiceBehaviour::default()).await
    }

    pub async fn start_with(behaviour: ServiceBehaviour) -> Self {
        let server = MockServer::start().await;
        let state = Arc::new(ServiceState::default());
        let base = server.uri();

        let sign_in_state = state.clone();
        Mock::given(method("POST"))
            .and(path("/v2/signin/"))
            .respond_with(move |_: &Request| {
                let n = sign_in_state.sign_ins.fetch_add(1, Ordering::SeqCst) + 1;
                if behaviour.reject_sign_in {
                    ResponseTemplate::new(401).set_body_string("Incorrect username or password.")
                } else {
                    ResponseTemplate::new(200).set_body_json(serde_json::json!({
                        "AccessToken": format!("access-{n}"),
                        "ExpiresIn": 3600,
                    }))
                }
            })
            .mount(&server)
            .await;

        let create_state = state.clone();
        let upload_base = base.clone();
        Mock::given(method("POST"))
            .and(path("/v2/task/"))
            .respond_with(move |_: &Request| {
                let n = create_state.created.fetch_add(1, Ordering::SeqCst) + 1;
                let task_id = format!("task-{n}");
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "task_id": task_id,
                    "upload_url": format!("{upload_base}/upload/{task_id}"),
                }))
            })
            .mount(&server)
            .await;

        let upload_state = state.clone();
        Mock::given(method("PUT"))
            .and(path_regex(r"^/upload/[^/]+$"))
            .respond_with(move |request: &Request| {
                upload_state
                    .uploads
                    .lock()
                    .unwrap()
                    .insert(segment(request, 1), request.body.clone());
                ResponseTemplate::new(200)
            })
            .mount(&server)
            .await;

        let status_state = state.clone();
        Mock::given(method("GET"))
            .and(path_regex(r"^/v2/task/[^/]+/status$"))
            .respond_with(move |request: &Request| {
                let task_id = segment(request, 2);
                let mut polls = status_state.polls.lock().unwrap();
                let count = polls.entry(task_id).or_insert(0);
                *count += 1;
                if *count <= behaviour.status_errors {
                    return ResponseTemplate::new(503).set_body_string("Service Unavailable");
                }
                let status = if *count - behaviour.status_errors >= behaviour.polls_until_done {
                    "done"
                } else {
                    "processing"
                };
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "task_status": status,
                }))
            })
            .mount(&server)
            .await;

        let record_state = state.clone();
        let result_base = base.clone();
        Mock::given(method("GET"))
            .and(path_regex(r"^/v2/task/[^/]+$"))
            .respond_with(move |request: &Request| {
                let task_id = segment(request, 2);
                let polls = record_state
                    .polls
                    .lock()
                    .unwrap()
                    .get(&task_id)
                    .copied()
                    .unwrap_or(0);
                let done = polls.saturating_sub(behaviour.status_errors)
                    >= behaviour.polls_until_done;
                let mut record = serde_json::json!({
                    "task_id": task_id,
                    "task_status": if done { "done" } else { "processing" },
                    "upload_url": format!("{result_base}/upload/{task_id}"),
                });
                if done {
                    record["anonymized_url"] =
                        serde_json::json!(format!("{result_base}/result/{task_id}"));
                }
                ResponseTemplate::new(200).set_body_json(record)
            })
            .mount(&server)
            .await;

        let result_state = state.clone();
        Mock::given(method("GET"))
            .and(path_regex(r"^/result/[^/]+$"))
            .respond_with(move |request: &Request| {
                let uploads = result_state.uploads.lock().unwrap();
                match uploads.get(&segment(request, 1)) {
                    Some(bytes) => {
                        let mut body = ANONYMIZED_PREFIX.to_vec();
                        body.extend_from_slice(bytes);
                        ResponseTemplate::new(200).set_body_bytes(body)
                    }
                    None => ResponseTemplate::new(404),
                }
            })
            .mount(&server)
            .await;

        Self { server, state }
    }

    /// Endpoint to configure the client with
    pub fn endpoint(&self) -> String {
        format!("{}/v2/", self.server.uri())
    }

    pub fn sign_in_count(&self) -> u64 {
        self.state.sign_ins.load(Ordering::SeqCst)
    }

    pub fn created_count(&self) -> u64 {
        self.state.created.load(Ordering::SeqCst)
    }

    /// Authorization header values sent with task creation, in arrival order
    pub async fn create_task_tokens(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == "POST" && r.url.path() == "/v2/task/")
            .filter_map(|r| {
                r.headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
            .collect()
    }
}

/// Expected output content for an input
pub fn anonymized(content: &[u8]) -> Vec<u8> {
    let mut expected = ANONYMIZED_PREFIX.to_vec();
    expected.extend_from_slice(content);
    expected
}
