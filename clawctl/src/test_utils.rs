//! Test utilities: in-memory stores, scripted runtime and bridge doubles, and an app harness.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use uuid::Uuid;

use crate::bridge::{Bridge, BridgeError, BridgeReply, ByteStream};
use crate::config::Config;
use crate::db::errors::{DbError, Result};
use crate::db::handlers::{DeploymentFilter, DeploymentStore, MessageFilter, MessageStore, UsageStore};
use crate::db::models::deployments::{Deployment, DeploymentCreateDBRequest, DeploymentStatus, Tier};
use crate::db::models::messages::{ClawMessage, MessageCreateDBRequest};
use crate::db::models::usage::{UsageCreateDBRequest, UsageRecord};
use crate::runtime::{ContainerRuntime, LogsQuery, RuntimeError};
use crate::types::{ClawId, OwnerId};
use crate::AppState;

pub const TEST_OWNER: &str = "owner-1";
pub const TEST_PROVISIONER_KEY: &str = "prov-secret";

pub fn create_test_config() -> Config {
    let mut config = Config {
        enable_metrics: false,
        ..Default::default()
    };
    config.auth.provisioner_key = Some(TEST_PROVISIONER_KEY.to_string());
    config
}

/// A freshly created deployment, before provisioning
pub fn deployment_fixture() -> Deployment {
    let now = Utc::now();
    Deployment {
        id: Uuid::new_v4(),
        owner_id: TEST_OWNER.to_string(),
        name: "test-claw".to_string(),
        status: DeploymentStatus::Queued,
        container_ref: String::new(),
        tier: Tier::Lite,
        is_public: false,
        heartbeat_interval_minutes: 0,
        heartbeat_instruction: String::new(),
        last_heartbeat_at: None,
        trial_ends_at: None,
        trial_warned: false,
        paid: false,
        proxy_token: format!("ck-{}", Uuid::new_v4().simple()),
        error_message: String::new(),
        created_at: now,
        updated_at: now,
    }
}

/// A provisioned deployment with a live container
pub fn running_deployment(container_ref: &str) -> Deployment {
    Deployment {
        status: DeploymentStatus::Running,
        container_ref: container_ref.to_string(),
        ..deployment_fixture()
    }
}

#[derive(Default)]
pub struct InMemoryDeployments {
    records: Mutex<HashMap<ClawId, Deployment>>,
}

impl InMemoryDeployments {
    pub fn insert(&self, deployment: Deployment) -> Deployment {
        self.records.lock().unwrap().insert(deployment.id, deployment.clone());
        deployment
    }

    pub fn snapshot(&self, id: ClawId) -> Option<Deployment> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<Deployment> {
        self.records.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl DeploymentStore for InMemoryDeployments {
    async fn create(&self, request: &DeploymentCreateDBRequest) -> Result<Deployment> {
        let now = Utc::now();
        let deployment = Deployment {
            id: Uuid::new_v4(),
            owner_id: request.owner_id.clone(),
            name: request.name.clone(),
            tier: request.tier,
            proxy_token: request.proxy_token.clone(),
            trial_ends_at: request.trial_ends_at,
            created_at: now,
            updated_at: now,
            ..deployment_fixture()
        };
        Ok(self.insert(deployment))
    }

    async fn get_by_id(&self, id: ClawId) -> Result<Option<Deployment>> {
        Ok(self.snapshot(id))
    }

    async fn get_running_by_proxy_token(&self, proxy_token: &str) -> Result<Option<Deployment>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|d| d.proxy_token == proxy_token && d.is_running())
            .cloned())
    }

    async fn list(&self, filter: &DeploymentFilter) -> Result<Vec<Deployment>> {
        let mut matching: Vec<Deployment> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        matching.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        matching.truncate(filter.limit.max(0) as usize);
        Ok(matching)
    }

    async fn save(&self, deployment: &Deployment) -> Result<Deployment> {
        let mut records = self.records.lock().unwrap();
        let Some(existing) = records.get_mut(&deployment.id) else {
            return Err(DbError::NotFound);
        };
        *existing = Deployment {
            updated_at: Utc::now(),
            ..deployment.clone()
        };
        Ok(existing.clone())
    }

    async fn delete(&self, id: ClawId) -> Result<bool> {
        Ok(self.records.lock().unwrap().remove(&id).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryUsage {
    records: Mutex<Vec<UsageRecord>>,
}

impl InMemoryUsage {
    /// Seed a record with an explicit timestamp
    pub fn insert_at(&self, deployment_id: ClawId, input_tokens: i64, output_tokens: i64, created_at: DateTime<Utc>) {
        self.records.lock().unwrap().push(UsageRecord {
            id: Uuid::new_v4(),
            deployment_id,
            input_tokens,
            output_tokens,
            model: "claude-test".to_string(),
            created_at,
        });
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsage {
    async fn record(&self, request: &UsageCreateDBRequest) -> Result<UsageRecord> {
        let record = UsageRecord {
            id: Uuid::new_v4(),
            deployment_id: request.deployment_id,
            input_tokens: request.input_tokens,
            output_tokens: request.output_tokens,
            model: request.model.clone(),
            created_at: Utc::now(),
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn count_since(&self, deployment_id: ClawId, since: DateTime<Utc>) -> Result<i64> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.deployment_id == deployment_id && r.created_at >= since)
            .count() as i64)
    }

    async fn sum_tokens_since(&self, deployment_id: ClawId, since: DateTime<Utc>) -> Result<i64> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.deployment_id == deployment_id && r.created_at >= since)
            .map(UsageRecord::total_tokens)
            .sum())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.created_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryMessages {
    records: Mutex<Vec<ClawMessage>>,
}

impl InMemoryMessages {
    /// Messages for one deployment in insertion order
    pub fn for_deployment(&self, deployment_id: ClawId) -> Vec<ClawMessage> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.deployment_id == deployment_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessages {
    async fn create(&self, request: &MessageCreateDBRequest) -> Result<ClawMessage> {
        let mut records = self.records.lock().unwrap();
        // Keep timestamps strictly increasing so `since` cursors behave like the database clock
        let mut created_at = Utc::now();
        if let Some(last) = records.last()
            && created_at <= last.created_at
        {
            created_at = last.created_at + chrono::Duration::microseconds(1);
        }
        let message = ClawMessage {
            id: Uuid::new_v4(),
            deployment_id: request.deployment_id,
            author: request.author,
            body: request.body.clone(),
            created_at,
        };
        records.push(message.clone());
        Ok(message)
    }

    async fn list(&self, deployment_id: ClawId, filter: &MessageFilter) -> Result<Vec<ClawMessage>> {
        let mut matching: Vec<ClawMessage> = self
            .for_deployment(deployment_id)
            .into_iter()
            .filter(|m| filter.since.is_none_or(|since| m.created_at > since))
            .collect();
        matching.reverse();
        matching.truncate(filter.limit.max(0) as usize);
        Ok(matching)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Remove {
        container: String,
    },
    Restart {
        container: String,
        grace_secs: u64,
    },
    Exec {
        container: String,
        cmd: Vec<String>,
    },
    CopyFileIn {
        container: String,
        dir: String,
        file_name: String,
        contents: String,
    },
    Logs {
        container: String,
        tail: u32,
        since: Option<DateTime<Utc>>,
    },
}

/// Records every call; outputs and failures are scripted per test
#[derive(Default)]
pub struct MockRuntime {
    calls: Mutex<Vec<RuntimeCall>>,
    exec_output: Mutex<Vec<u8>>,
    logs_output: Mutex<Vec<u8>>,
    fail_remove: AtomicBool,
    fail_restart: AtomicBool,
}

impl MockRuntime {
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_exec_output(&self, output: &[u8]) {
        *self.exec_output.lock().unwrap() = output.to_vec();
    }

    pub fn set_logs_output(&self, output: &[u8]) {
        *self.logs_output.lock().unwrap() = output.to_vec();
    }

    pub fn fail_remove(&self) {
        self.fail_remove.store(true, Ordering::SeqCst);
    }

    pub fn fail_restart(&self) {
        self.fail_restart.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn scripted_failure() -> RuntimeError {
        RuntimeError::Api {
            status: 500,
            message: "runtime unavailable".to_string(),
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn remove(&self, container_ref: &str) -> std::result::Result<(), RuntimeError> {
        self.record(RuntimeCall::Remove {
            container: container_ref.to_string(),
        });
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(Self::scripted_failure());
        }
        Ok(())
    }

    async fn restart(&self, container_ref: &str, grace: Duration) -> std::result::Result<(), RuntimeError> {
        self.record(RuntimeCall::Restart {
            container: container_ref.to_string(),
            grace_secs: grace.as_secs(),
        });
        if self.fail_restart.load(Ordering::SeqCst) {
            return Err(Self::scripted_failure());
        }
        Ok(())
    }

    async fn exec(&self, container_ref: &str, cmd: &[&str]) -> std::result::Result<Vec<u8>, RuntimeError> {
        self.record(RuntimeCall::Exec {
            container: container_ref.to_string(),
            cmd: cmd.iter().map(|s| s.to_string()).collect(),
        });
        Ok(self.exec_output.lock().unwrap().clone())
    }

    async fn copy_file_in(
        &self,
        container_ref: &str,
        dir: &str,
        file_name: &str,
        contents: &[u8],
    ) -> std::result::Result<(), RuntimeError> {
        self.record(RuntimeCall::CopyFileIn {
            container: container_ref.to_string(),
            dir: dir.to_string(),
            file_name: file_name.to_string(),
            contents: String::from_utf8_lossy(contents).into_owned(),
        });
        Ok(())
    }

    async fn logs(&self, container_ref: &str, query: LogsQuery) -> std::result::Result<Vec<u8>, RuntimeError> {
        self.record(RuntimeCall::Logs {
            container: container_ref.to_string(),
            tail: query.tail,
            since: query.since,
        });
        Ok(self.logs_output.lock().unwrap().clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub container: String,
    pub user_id: String,
    pub text: String,
}

/// Bridge double. Replies are consumed in order; an exhausted queue is an agent error.
#[derive(Default)]
pub struct MockBridge {
    replies: Mutex<VecDeque<std::result::Result<BridgeReply, String>>>,
    stream_chunks: Mutex<Option<Vec<Bytes>>>,
    sent: Mutex<Vec<SentMessage>>,
}

impl MockBridge {
    pub fn push_reply(&self, text: &str) {
        self.push_bridge_reply(BridgeReply {
            text: text.to_string(),
            ..Default::default()
        });
    }

    pub fn push_bridge_reply(&self, reply: BridgeReply) {
        self.replies.lock().unwrap().push_back(Ok(reply));
    }

    pub fn push_error(&self, message: &str) {
        self.replies.lock().unwrap().push_back(Err(message.to_string()));
    }

    /// Body chunks for the next streaming turn; unset makes `stream` fail
    pub fn set_stream(&self, chunks: &[&str]) {
        *self.stream_chunks.lock().unwrap() = Some(chunks.iter().map(|c| Bytes::from(c.to_string())).collect());
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, container_ref: &str, user_id: &str, text: &str) {
        self.sent.lock().unwrap().push(SentMessage {
            container: container_ref.to_string(),
            user_id: user_id.to_string(),
            text: text.to_string(),
        });
    }
}

#[async_trait]
impl Bridge for MockBridge {
    async fn send(&self, container_ref: &str, user_id: &str, text: &str) -> std::result::Result<BridgeReply, BridgeError> {
        self.record(container_ref, user_id, text);
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => crate::bridge::into_result(reply),
            Some(Err(message)) => Err(BridgeError::Agent(message)),
            None => Err(BridgeError::Agent("no scripted reply".to_string())),
        }
    }

    async fn stream(&self, container_ref: &str, user_id: &str, text: &str) -> std::result::Result<ByteStream, BridgeError> {
        self.record(container_ref, user_id, text);
        let chunks = self.stream_chunks.lock().unwrap().take().ok_or(BridgeError::Status(503))?;
        Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

/// Router backed by in-memory stores and scripted doubles
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub deployments: Arc<InMemoryDeployments>,
    pub usage: Arc<InMemoryUsage>,
    pub messages: Arc<InMemoryMessages>,
    pub runtime: Arc<MockRuntime>,
    pub bridge: Arc<MockBridge>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(create_test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let deployments = Arc::new(InMemoryDeployments::default());
        let usage = Arc::new(InMemoryUsage::default());
        let messages = Arc::new(InMemoryMessages::default());
        let runtime = Arc::new(MockRuntime::default());
        let bridge = Arc::new(MockBridge::default());

        let state = AppState::builder()
            .config(config)
            .deployments(deployments.clone())
            .usage(usage.clone())
            .messages(messages.clone())
            .runtime(runtime.clone())
            .bridge(bridge.clone())
            .upstream(reqwest::Client::new())
            .build();

        let router = crate::build_router(&state);
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            state,
            deployments,
            usage,
            messages,
            runtime,
            bridge,
        }
    }

    /// Insert a running claw owned by `owner`
    pub fn running_claw(&self, owner: impl Into<OwnerId>, container_ref: &str) -> Deployment {
        self.deployments.insert(Deployment {
            owner_id: owner.into(),
            ..running_deployment(container_ref)
        })
    }
}
