//! Shared test helpers: an in-memory anonymization service and config builders.

use crate::client::AnonymizationApi;
use crate::config::Config;
use crate::error::{ApiError, Error, Result};
use crate::types::{CreatedTask, Credential, Task, TaskId, TaskStatus};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Prefix the fake service puts in front of every uploaded image
pub(crate) const ANONYMIZED_PREFIX: &[u8] = b"anonymized:";

/// How a fake task progresses while it is polled
#[derive(Clone, Copy, Debug)]
pub(crate) enum Progress {
    /// `processing` until the given poll, `done` from then on
    DoneAfter(u32),
    /// `processing` forever
    Never,
    /// `processing` forever, but the task record already carries the result
    StaleStatus,
    /// Terminal status reported on the first poll
    Ends(TaskStatus),
}

#[derive(Default)]
struct FakeTask {
    polls: u32,
    uploaded: Option<Vec<u8>>,
}

struct FakeState {
    sign_ins: u64,
    allowed_sign_ins: Option<u64>,
    token_validity: Option<Duration>,
    sign_in_delay: Duration,
    progress: Progress,
    transient_status_errors: u32,
    fail_create: bool,
    fail_uploads: bool,
    empty_results: u32,
    created: u64,
    tasks: HashMap<TaskId, FakeTask>,
    tokens_used: Vec<String>,
    fetches: u32,
}

/// In-memory [`AnonymizationApi`] with scriptable failures
///
/// Tasks are numbered `task-1`, `task-2`, ... and credentials `token-1`,
/// `token-2`, ... in call order. The anonymized result of an upload is the uploaded
/// bytes behind [`ANONYMIZED_PREFIX`].
pub(crate) struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                sign_ins: 0,
                allowed_sign_ins: None,
                token_validity: Some(Duration::from_secs(3600)),
                sign_in_delay: Duration::ZERO,
                progress: Progress::DoneAfter(1),
                transient_status_errors: 0,
                fail_create: false,
                fail_uploads: false,
                empty_results: 0,
                created: 0,
                tasks: HashMap::new(),
                tokens_used: Vec::new(),
                fetches: 0,
            }),
        }
    }

    /// Accept `n` more sign-ins in total (counting the ones already made), reject the rest
    pub(crate) fn reject_sign_in_after(&self, n: u64) {
        self.state.lock().unwrap().allowed_sign_ins = Some(n);
    }

    /// Delay every later sign-in answer by `delay`
    pub(crate) fn delay_sign_in(&self, delay: Duration) {
        self.state.lock().unwrap().sign_in_delay = delay;
    }

    /// Validity reported with issued credentials (default one hour)
    pub(crate) fn with_token_validity(self, validity: Option<Duration>) -> Self {
        self.state.lock().unwrap().token_validity = validity;
        self
    }

    pub(crate) fn with_progress(self, progress: Progress) -> Self {
        self.state.lock().unwrap().progress = progress;
        self
    }

    /// Answer the first `n` status queries of every task with a 503
    pub(crate) fn with_transient_status_errors(self, n: u32) -> Self {
        self.state.lock().unwrap().transient_status_errors = n;
        self
    }

    pub(crate) fn failing_create(self) -> Self {
        self.state.lock().unwrap().fail_create = true;
        self
    }

    pub(crate) fn failing_uploads(self) -> Self {
        self.state.lock().unwrap().fail_uploads = true;
        self
    }

    /// Serve an empty body for the first `n` result downloads
    pub(crate) fn with_empty_results(self, n: u32) -> Self {
        self.state.lock().unwrap().empty_results = n;
        self
    }

    pub(crate) fn sign_in_count(&self) -> u64 {
        self.state.lock().unwrap().sign_ins
    }

    pub(crate) fn created_count(&self) -> u64 {
        self.state.lock().unwrap().created
    }

    pub(crate) fn fetch_count(&self) -> u32 {
        self.state.lock().unwrap().fetches
    }

    /// Highest number of status polls any task received
    pub(crate) fn max_polls(&self) -> u32 {
        let state = self.state.lock().unwrap();
        state.tasks.values().map(|t| t.polls).max().unwrap_or(0)
    }

    /// Tokens presented to `create_task`, in call order
    pub(crate) fn tokens_used(&self) -> Vec<String> {
        self.state.lock().unwrap().tokens_used.clone()
    }

    fn status_of(progress: Progress, polls: u32) -> TaskStatus {
        match progress {
            Progress::DoneAfter(n) if polls >= n => TaskStatus::Done,
            Progress::DoneAfter(_) | Progress::Never | Progress::StaleStatus => {
                TaskStatus::Processing
            }
            Progress::Ends(status) => status,
        }
    }
}

#[async_trait::async_trait]
impl AnonymizationApi for FakeApi {
    async fn sign_in(&self, _username: &str, _password: &str) -> Result<Credential> {
        let (result, delay) = {
            let mut state = self.state.lock().unwrap();
            state.sign_ins += 1;
            let result = match state.allowed_sign_ins {
                Some(allowed) if state.sign_ins > allowed => {
                    Err(Error::Auth("login rejected (status 401)".into()))
                }
                _ => Ok(Credential::new(
                    format!("token-{}", state.sign_ins),
                    state.token_validity,
                )),
            };
            (result, state.sign_in_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn create_task(
        &self,
        _anonymization: &serde_json::Value,
        credential: &Credential,
    ) -> Result<CreatedTask> {
        let mut state = self.state.lock().unwrap();
        state.tokens_used.push(credential.token.clone());
        if state.fail_create {
            return Err(ApiError::TaskCreate {
                status: 400,
                body: "invalid configuration".into(),
            }
            .into());
        }
        state.created += 1;
        let task_id = TaskId(format!("task-{}", state.created));
        state.tasks.insert(task_id.clone(), FakeTask::default());
        Ok(CreatedTask {
            upload_url: format!("fake://upload/{task_id}"),
            task_id,
        })
    }

    async fn upload(&self, upload_url: &str, bytes: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_uploads {
            return Err(ApiError::Upload {
                status: 403,
                body: "signature expired".into(),
            }
            .into());
        }
        let task_id = TaskId::from(upload_url.trim_start_matches("fake://upload/"));
        if let Some(task) = state.tasks.get_mut(&task_id) {
            task.uploaded = Some(bytes);
        }
        Ok(())
    }

    async fn task_status(&self, task_id: &TaskId, _credential: &Credential) -> Result<TaskStatus> {
        let mut state = self.state.lock().unwrap();
        let progress = state.progress;
        let transient = state.transient_status_errors;
        let task = state.tasks.get_mut(task_id).ok_or_else(|| ApiError::StatusQuery {
            task_id: task_id.clone(),
            status: 404,
            body: "no such task".into(),
        })?;
        task.polls += 1;
        if task.polls <= transient {
            return Err(ApiError::StatusQuery {
                task_id: task_id.clone(),
                status: 503,
                body: "busy".into(),
            }
            .into());
        }
        Ok(Self::status_of(progress, task.polls - transient))
    }

    async fn task(&self, task_id: &TaskId, _credential: &Credential) -> Result<Task> {
        let state = self.state.lock().unwrap();
        let task = state.tasks.get(task_id).ok_or_else(|| ApiError::TaskFetch {
            task_id: task_id.clone(),
            status: 404,
            body: "no such task".into(),
        })?;
        let status = Self::status_of(
            state.progress,
            task.polls.saturating_sub(state.transient_status_errors),
        );
        let has_result =
            status == TaskStatus::Done || matches!(state.progress, Progress::StaleStatus);
        Ok(Task {
            id: task_id.clone(),
            status,
            upload_url: None,
            anonymized_url: has_result.then(|| format!("fake://result/{task_id}")),
        })
    }

    async fn fetch_result(&self, anonymized_url: &str) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.fetches += 1;
        if state.empty_results > 0 {
            state.empty_results -= 1;
            return Err(ApiError::EmptyResult.into());
        }
        let task_id = TaskId::from(anonymized_url.trim_start_matches("fake://result/"));
        let uploaded = state
            .tasks
            .get(&task_id)
            .and_then(|t| t.uploaded.clone())
            .ok_or(ApiError::ResultFetch { status: 404 })?;
        let mut result = ANONYMIZED_PREFIX.to_vec();
        result.extend_from_slice(&uploaded);
        Ok(result)
    }
}

/// Config pointing at `root/in` and `root/out` with timings suited to tests
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.service.username = "user".into();
    config.service.password = "secret".into();
    config.source.input_dir = root.join("in");
    config.source.output_dir = root.join("out");
    config.pipeline.workers = 2;
    config.pipeline.poll_interval = Duration::ZERO;
    config.pipeline.fetch_retry.initial_delay = Duration::from_millis(1);
    config.pipeline.fetch_retry.jitter = false;
    config.anonymization = serde_json::json!({ "face": { "anonymization": "blur" } });
    std::fs::create_dir_all(&config.source.input_dir).unwrap();
    config
}

/// Write an input file (creating parent directories) and return its content
pub(crate) fn write_input(config: &Config, relative: &str) -> Vec<u8> {
    let path = config.source.input_dir.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let content = format!("image {relative}").into_bytes();
    std::fs::write(&path, &content).unwrap();
    content
}

/// Expected result file content for an input
pub(crate) fn anonymized(content: &[u8]) -> Vec<u8> {
    let mut expected = ANONYMIZED_PREFIX.to_vec();
    expected.extend_from_slice(content);
    expected
}
