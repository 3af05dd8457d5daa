//! In-memory implementation of every cloud collaborator.
//!
//! Backs the `local` provider and all tests. State lives behind one mutex;
//! tests seed and inspect it through [`MemoryCloud::state`]. Failure modes the
//! control plane must tolerate (busy stacks, services with active
//! deployments, stale log tokens) are reproduced with the same structural
//! errors a real adapter would return.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use tracing::debug;

use crate::api::*;
use crate::error::{CloudError, CloudResult};
use crate::types::*;

const ACCOUNT: &str = "123456789012";

#[derive(Debug)]
pub struct StoredMessage {
    pub id: String,
    pub body: String,
    pub receipt: Option<String>,
    visible_at: Instant,
}

#[derive(Debug, Default)]
pub struct LogStream {
    pub events: Vec<LogEvent>,
    token: u64,
}

impl LogStream {
    fn expected_token(&self) -> Option<String> {
        (!self.events.is_empty()).then(|| self.token.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyState {
    pub rotation: bool,
    pub pending_deletion: bool,
}

#[derive(Debug)]
pub struct MemoryState {
    pub region: String,

    pub stacks: BTreeMap<String, Stack>,
    pub stack_updates: Vec<StackUpdate>,
    pub cancelled_updates: Vec<String>,
    pub describe_stack_calls: u32,
    /// Leave stacks `UPDATE_IN_PROGRESS` after an update instead of completing.
    pub hold_updates: bool,

    pub clusters: BTreeMap<String, String>,
    pub services: BTreeMap<String, EcsService>,
    pub service_tasks: BTreeMap<String, Vec<String>>,
    pub stopped_tasks: Vec<String>,
    /// How many upcoming `delete_service` calls fail as still deploying.
    pub delete_in_progress: u32,
    pub delete_service_calls: u32,
    pub task_definitions: BTreeMap<String, TaskDefinition>,
    pub container_instances: Vec<ContainerInstance>,

    pub groups: BTreeMap<String, AutoScalingGroup>,
    pub health_marks: Vec<(String, bool)>,

    pub objects: BTreeMap<(String, String), Vec<u8>>,
    pub keys: BTreeMap<String, KeyState>,
    pub queues: BTreeMap<String, VecDeque<StoredMessage>>,
    pub log_streams: BTreeMap<(String, String), LogStream>,

    pub availability_zones: Vec<String>,
    pub repositories: BTreeMap<String, Vec<String>>,
    pub functions: BTreeMap<String, FunctionSpec>,
    pub subscriptions: BTreeMap<String, (String, String, String)>,
    pub published: Vec<(String, String, String)>,
    pub rules: BTreeMap<String, (String, Vec<RuleTarget>)>,
    pub ingress: Vec<IngressRule>,

    counter: u64,
}

impl MemoryState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{prefix}{:08}", self.counter)
    }

    fn service_mut(&mut self, service: &str) -> CloudResult<&mut EcsService> {
        let name = service_name(service);
        self.services
            .get_mut(name)
            .ok_or_else(|| CloudError::NotFound(format!("service {name}")))
    }

    /// All lines written to a log group, in order, across streams.
    pub fn log_lines(&self, group: &str) -> Vec<String> {
        self.log_streams
            .iter()
            .filter(|((g, _), _)| g == group)
            .flat_map(|(_, s)| s.events.iter().map(|e| e.message.clone()))
            .collect()
    }

    /// Messages still held by a queue, visible or not.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.queues.get(queue).map_or(0, VecDeque::len)
    }
}

/// Accept either a bare service name or a full service ARN.
fn service_name(service: &str) -> &str {
    service.rsplit('/').next().unwrap_or(service)
}

pub struct MemoryCloud {
    state: Mutex<MemoryState>,
    arrivals: Notify,
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                region: "us-east-1".to_string(),
                stacks: BTreeMap::new(),
                stack_updates: Vec::new(),
                cancelled_updates: Vec::new(),
                describe_stack_calls: 0,
                hold_updates: false,
                clusters: BTreeMap::new(),
                services: BTreeMap::new(),
                service_tasks: BTreeMap::new(),
                stopped_tasks: Vec::new(),
                delete_in_progress: 0,
                delete_service_calls: 0,
                task_definitions: BTreeMap::new(),
                container_instances: Vec::new(),
                groups: BTreeMap::new(),
                health_marks: Vec::new(),
                objects: BTreeMap::new(),
                keys: BTreeMap::new(),
                queues: BTreeMap::new(),
                log_streams: BTreeMap::new(),
                availability_zones: vec![
                    "us-east-1a".to_string(),
                    "us-east-1b".to_string(),
                    "us-east-1c".to_string(),
                ],
                repositories: BTreeMap::new(),
                functions: BTreeMap::new(),
                subscriptions: BTreeMap::new(),
                published: Vec::new(),
                rules: BTreeMap::new(),
                ingress: Vec::new(),
                counter: 0,
            }),
            arrivals: Notify::new(),
        }
    }

    /// Lock the fake's state for seeding or inspection.
    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Seeding helpers ────────────────────────────────────────────

    pub fn put_stack(&self, stack: Stack) {
        self.state().stacks.insert(stack.name.clone(), stack);
    }

    pub fn put_group(&self, group: AutoScalingGroup) {
        self.state().groups.insert(group.name.clone(), group);
    }

    pub fn add_container_instance(&self, instance: ContainerInstance) {
        self.state().container_instances.push(instance);
    }

    pub fn add_task(&self, service: &str, task: &str) {
        self.state()
            .service_tasks
            .entry(service_name(service).to_string())
            .or_default()
            .push(task.to_string());
    }

    pub fn add_service(&self, service: EcsService) {
        self.state().services.insert(service.name.clone(), service);
    }

    pub fn add_task_definition(&self, arn: &str, def: TaskDefinition) {
        self.state().task_definitions.insert(arn.to_string(), def);
    }

    fn wrap_key(key_arn: &str, plaintext: &[u8]) -> Vec<u8> {
        let mask = Sha256::digest(key_arn.as_bytes());
        let mut blob = key_arn.as_bytes().to_vec();
        blob.push(0);
        blob.extend(plaintext.iter().zip(mask.iter().cycle()).map(|(p, m)| p ^ m));
        blob
    }
}

#[async_trait]
impl StackEngine for MemoryCloud {
    async fn describe_stack(&self, name: &str) -> CloudResult<Stack> {
        let mut state = self.state();
        state.describe_stack_calls += 1;
        state
            .stacks
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("Stack with id {name} does not exist")))
    }

    async fn update_stack(&self, update: &StackUpdate) -> CloudResult<()> {
        let mut state = self.state();
        let hold = state.hold_updates;
        let stack = state
            .stacks
            .get_mut(&update.stack)
            .ok_or_else(|| CloudError::NotFound(format!("Stack with id {} does not exist", update.stack)))?;
        if stack.is_updating() {
            return Err(CloudError::Conflict(format!(
                "Stack:{} is in {} state and can not be updated",
                update.stack, stack.status
            )));
        }
        for param in &update.parameters {
            if let StackParameter::Value { key, value } = param {
                stack.parameters.insert(key.clone(), value.clone());
            }
        }
        stack.status = if hold { "UPDATE_IN_PROGRESS" } else { "UPDATE_COMPLETE" }.to_string();
        debug!(stack = %update.stack, params = update.parameters.len(), "stack updated");
        state.stack_updates.push(update.clone());
        Ok(())
    }

    async fn cancel_update_stack(&self, name: &str) -> CloudResult<()> {
        let mut state = self.state();
        let stack = state
            .stacks
            .get_mut(name)
            .ok_or_else(|| CloudError::NotFound(format!("Stack with id {name} does not exist")))?;
        if stack.status != "UPDATE_IN_PROGRESS" {
            return Err(CloudError::api(
                "ValidationError",
                format!("CancelUpdateStack cannot be called from current stack status {}", stack.status),
            ));
        }
        stack.status = "UPDATE_ROLLBACK_COMPLETE".to_string();
        state.cancelled_updates.push(name.to_string());
        Ok(())
    }
}

#[async_trait]
impl Scheduler for MemoryCloud {
    async fn create_cluster(&self, name: &str) -> CloudResult<String> {
        let mut state = self.state();
        let arn = format!("arn:aws:ecs:{}:{ACCOUNT}:cluster/{name}", state.region);
        state.clusters.insert(name.to_string(), arn.clone());
        Ok(arn)
    }

    async fn delete_cluster(&self, cluster: &str) -> CloudResult<()> {
        let name = service_name(cluster).to_string();
        match self.state().clusters.remove(&name) {
            Some(_) => Ok(()),
            None => Err(CloudError::NotFound(format!("cluster {name}"))),
        }
    }

    async fn create_service(&self, req: &CreateService) -> CloudResult<EcsService> {
        let mut state = self.state();
        if state.services.contains_key(&req.name) {
            return Err(CloudError::Conflict(format!("service {} already exists", req.name)));
        }
        let service = EcsService {
            arn: format!("arn:aws:ecs:{}:{ACCOUNT}:service/{}", state.region, req.name),
            name: req.name.clone(),
            cluster: req.cluster.clone(),
            task_definition: req.task_definition.clone(),
            desired_count: req.desired_count,
            running_count: 0,
            role: req.role.clone(),
            load_balancers: req.load_balancers.clone(),
            deployment: req.deployment,
            events: Vec::new(),
        };
        state.services.insert(req.name.clone(), service.clone());
        Ok(service)
    }

    async fn update_service(&self, req: &UpdateService) -> CloudResult<EcsService> {
        let mut state = self.state();
        let service = state.service_mut(&req.service)?;
        if let Some(count) = req.desired_count {
            service.desired_count = count;
        }
        if let Some(td) = &req.task_definition {
            service.task_definition = td.clone();
        }
        if let Some(d) = req.deployment {
            service.deployment = Some(d);
        }
        Ok(service.clone())
    }

    async fn describe_service(&self, _cluster: &str, service: &str) -> CloudResult<EcsService> {
        Ok(self.state().service_mut(service)?.clone())
    }

    async fn list_services(&self, cluster: &str) -> CloudResult<Vec<EcsService>> {
        Ok(self
            .state()
            .services
            .values()
            .filter(|s| s.cluster == cluster)
            .cloned()
            .collect())
    }

    async fn delete_service(&self, _cluster: &str, service: &str) -> CloudResult<()> {
        let mut state = self.state();
        state.delete_service_calls += 1;
        let name = service_name(service).to_string();
        if !state.services.contains_key(&name) {
            return Err(CloudError::NotFound(format!("service {name}")));
        }
        if state.delete_in_progress > 0 {
            state.delete_in_progress -= 1;
            return Err(CloudError::InProgress(
                "The service cannot be stopped while deployments are active.".to_string(),
            ));
        }
        state.services.remove(&name);
        state.service_tasks.remove(&name);
        Ok(())
    }

    async fn list_tasks(&self, _cluster: &str, service: &str) -> CloudResult<Vec<String>> {
        let state = self.state();
        let name = service_name(service);
        if !state.services.contains_key(name) {
            return Err(CloudError::NotFound(format!("service {name}")));
        }
        Ok(state.service_tasks.get(name).cloned().unwrap_or_default())
    }

    async fn stop_task(&self, _cluster: &str, task: &str) -> CloudResult<()> {
        let mut state = self.state();
        for tasks in state.service_tasks.values_mut() {
            tasks.retain(|t| t != task);
        }
        state.stopped_tasks.push(task.to_string());
        Ok(())
    }

    async fn register_task_definition(&self, def: &TaskDefinition) -> CloudResult<String> {
        let mut state = self.state();
        let revision = state
            .task_definitions
            .values()
            .filter(|d| d.family == def.family)
            .count()
            + 1;
        let arn = format!(
            "arn:aws:ecs:{}:{ACCOUNT}:task-definition/{}:{revision}",
            state.region, def.family
        );
        state.task_definitions.insert(arn.clone(), def.clone());
        Ok(arn)
    }

    async fn describe_task_definition(&self, arn: &str) -> CloudResult<TaskDefinition> {
        self.state()
            .task_definitions
            .get(arn)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("task definition {arn}")))
    }

    async fn list_container_instances(&self, _cluster: &str) -> CloudResult<Vec<ContainerInstance>> {
        Ok(self.state().container_instances.clone())
    }
}

#[async_trait]
impl AutoScaling for MemoryCloud {
    async fn describe_group(&self, name: &str) -> CloudResult<AutoScalingGroup> {
        self.state()
            .groups
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("auto scaling group {name}")))
    }

    async fn set_instance_health(
        &self,
        instance_id: &str,
        healthy: bool,
        _respect_grace_period: bool,
    ) -> CloudResult<()> {
        let mut state = self.state();
        let instance = state
            .groups
            .values_mut()
            .flat_map(|g| g.instances.iter_mut())
            .find(|i| i.id == instance_id)
            .ok_or_else(|| CloudError::NotFound(format!("instance {instance_id}")))?;
        instance.healthy = healthy;
        state.health_marks.push((instance_id.to_string(), healthy));
        Ok(())
    }

    async fn set_desired_capacity(&self, group: &str, capacity: u32) -> CloudResult<()> {
        let mut state = self.state();
        let g = state
            .groups
            .get_mut(group)
            .ok_or_else(|| CloudError::NotFound(format!("auto scaling group {group}")))?;
        g.desired_capacity = capacity;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryCloud {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> CloudResult<()> {
        self.state()
            .objects
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> CloudResult<Vec<u8>> {
        self.state()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("s3://{bucket}/{key}")))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> CloudResult<()> {
        self.state()
            .objects
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> CloudResult<Vec<String>> {
        Ok(self
            .state()
            .objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }
}

#[async_trait]
impl KeyManagement for MemoryCloud {
    async fn generate_data_key(&self, key_arn: &str, bytes: usize) -> CloudResult<DataKey> {
        if self
            .state()
            .keys
            .get(key_arn)
            .is_some_and(|k| k.pending_deletion)
        {
            return Err(CloudError::api("KMSInvalidStateException", format!("{key_arn} is pending deletion")));
        }
        let mut plaintext = vec![0u8; bytes];
        rand::thread_rng().fill_bytes(&mut plaintext);
        let ciphertext = Self::wrap_key(key_arn, &plaintext);
        Ok(DataKey {
            plaintext,
            ciphertext,
        })
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> CloudResult<Vec<u8>> {
        let invalid = || CloudError::api("InvalidCiphertextException", "ciphertext is not a wrapped data key");
        let split = ciphertext.iter().position(|b| *b == 0).ok_or_else(invalid)?;
        let key_arn = std::str::from_utf8(&ciphertext[..split]).map_err(|_| invalid())?;
        let mask = Sha256::digest(key_arn.as_bytes());
        Ok(ciphertext[split + 1..]
            .iter()
            .zip(mask.iter().cycle())
            .map(|(c, m)| c ^ m)
            .collect())
    }

    async fn generate_random(&self, bytes: usize) -> CloudResult<Vec<u8>> {
        let mut out = vec![0u8; bytes];
        rand::thread_rng().fill_bytes(&mut out);
        Ok(out)
    }

    async fn create_key(&self, _description: &str) -> CloudResult<String> {
        let mut state = self.state();
        let id = state.next_id("key-");
        let arn = format!("arn:aws:kms:{}:{ACCOUNT}:key/{id}", state.region);
        state.keys.insert(arn.clone(), KeyState::default());
        Ok(arn)
    }

    async fn enable_key_rotation(&self, key_arn: &str) -> CloudResult<()> {
        let mut state = self.state();
        let key = state
            .keys
            .get_mut(key_arn)
            .ok_or_else(|| CloudError::NotFound(format!("key {key_arn}")))?;
        key.rotation = true;
        Ok(())
    }

    async fn schedule_key_deletion(&self, key_arn: &str, _pending_days: u32) -> CloudResult<()> {
        let mut state = self.state();
        let key = state
            .keys
            .get_mut(key_arn)
            .ok_or_else(|| CloudError::NotFound(format!("key {key_arn}")))?;
        if key.pending_deletion {
            return Err(CloudError::api(
                "KMSInvalidStateException",
                format!("{key_arn} is pending deletion"),
            ));
        }
        key.pending_deletion = true;
        Ok(())
    }
}

#[async_trait]
impl Queue for MemoryCloud {
    async fn receive(&self, queue: &str, opts: ReceiveOptions) -> CloudResult<Vec<QueueMessage>> {
        let deadline = Instant::now() + Duration::from_secs(opts.wait_secs);
        loop {
            let notified = self.arrivals.notified();
            {
                let mut state = self.state();
                let now = Instant::now();
                let mut receipts = Vec::new();
                let count = state.queues.get(queue).map_or(0, VecDeque::len);
                for i in 0..count {
                    if receipts.len() >= opts.max_messages {
                        break;
                    }
                    let receipt = state.next_id("rcpt-");
                    let Some(msg) = state.queues.get_mut(queue).and_then(|q| q.get_mut(i)) else {
                        break;
                    };
                    if msg.visible_at > now {
                        continue;
                    }
                    msg.visible_at = now + Duration::from_secs(opts.visibility_timeout_secs);
                    msg.receipt = Some(receipt.clone());
                    receipts.push(QueueMessage {
                        id: msg.id.clone(),
                        receipt,
                        body: msg.body.clone(),
                    });
                }
                if !receipts.is_empty() {
                    return Ok(receipts);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            // Woken by a send, or re-check when invisible messages expire.
            let _ = tokio::time::timeout((deadline - now).min(Duration::from_millis(250)), notified).await;
        }
    }

    async fn delete_message(&self, queue: &str, receipt: &str) -> CloudResult<()> {
        let mut state = self.state();
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| CloudError::NotFound(format!("queue {queue}")))?;
        q.retain(|m| m.receipt.as_deref() != Some(receipt));
        Ok(())
    }

    async fn send_message(&self, queue: &str, body: &str) -> CloudResult<String> {
        let id = {
            let mut state = self.state();
            let id = state.next_id("msg-");
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(StoredMessage {
                    id: id.clone(),
                    body: body.to_string(),
                    receipt: None,
                    visible_at: Instant::now(),
                });
            id
        };
        self.arrivals.notify_waiters();
        Ok(id)
    }
}

#[async_trait]
impl Logs for MemoryCloud {
    async fn create_log_stream(&self, group: &str, stream: &str) -> CloudResult<()> {
        let mut state = self.state();
        let key = (group.to_string(), stream.to_string());
        if state.log_streams.contains_key(&key) {
            return Err(CloudError::Conflict(format!("log stream {stream} already exists")));
        }
        state.log_streams.insert(key, LogStream::default());
        Ok(())
    }

    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: &[LogEvent],
        sequence_token: Option<&str>,
    ) -> CloudResult<Option<String>> {
        let mut state = self.state();
        let s = state
            .log_streams
            .get_mut(&(group.to_string(), stream.to_string()))
            .ok_or_else(|| CloudError::NotFound(format!("log stream {group}/{stream}")))?;
        let expected = s.expected_token();
        if expected.as_deref() != sequence_token {
            return Err(CloudError::InvalidToken {
                next: expected.unwrap_or_default(),
            });
        }
        s.events.extend(events.iter().cloned());
        s.token += 1;
        Ok(Some(s.token.to_string()))
    }
}

#[async_trait]
impl Compute for MemoryCloud {
    async fn create_subnet(
        &self,
        vpc: &str,
        availability_zone: &str,
        _cidr: &str,
    ) -> CloudResult<String> {
        let mut state = self.state();
        if !state.availability_zones.iter().any(|z| z == availability_zone) {
            return Err(CloudError::api(
                "InvalidParameterValue",
                format!(
                    "Value ({availability_zone}) for parameter availabilityZone is invalid. \
                     Subnets can currently only be created in the following availability zones: {}.",
                    state.availability_zones.join(", ")
                ),
            ));
        }
        Ok(state.next_id(&format!("subnet-{vpc}-")))
    }
}

#[async_trait]
impl Registry for MemoryCloud {
    async fn create_repository(&self, name: &str) -> CloudResult<Repository> {
        let mut state = self.state();
        if state.repositories.contains_key(name) {
            return Err(CloudError::Conflict(format!("repository {name} already exists")));
        }
        state.repositories.insert(name.to_string(), Vec::new());
        Ok(Repository {
            registry_id: ACCOUNT.to_string(),
            name: name.to_string(),
        })
    }

    async fn list_images(&self, repository: &str) -> CloudResult<Vec<String>> {
        self.state()
            .repositories
            .get(repository)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("repository {repository}")))
    }

    async fn delete_images(&self, repository: &str, digests: &[String]) -> CloudResult<()> {
        let mut state = self.state();
        let images = state
            .repositories
            .get_mut(repository)
            .ok_or_else(|| CloudError::NotFound(format!("repository {repository}")))?;
        let doomed: BTreeSet<&String> = digests.iter().collect();
        images.retain(|i| !doomed.contains(i));
        Ok(())
    }

    async fn delete_repository(&self, repository: &str) -> CloudResult<()> {
        let mut state = self.state();
        match state.repositories.get(repository) {
            None => Err(CloudError::NotFound(format!("repository {repository}"))),
            Some(images) if !images.is_empty() => Err(CloudError::api(
                "RepositoryNotEmptyException",
                format!("repository {repository} still contains images"),
            )),
            Some(_) => {
                state.repositories.remove(repository);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Functions for MemoryCloud {
    async fn create_function(&self, spec: &FunctionSpec) -> CloudResult<String> {
        let mut state = self.state();
        if state.functions.contains_key(&spec.name) {
            return Err(CloudError::Conflict(format!("function {} already exists", spec.name)));
        }
        state.functions.insert(spec.name.clone(), spec.clone());
        Ok(format!("arn:aws:lambda:{}:{ACCOUNT}:function:{}", state.region, spec.name))
    }

    async fn update_function_code(&self, name: &str, code: &(String, String)) -> CloudResult<()> {
        let mut state = self.state();
        let f = state
            .functions
            .get_mut(name)
            .ok_or_else(|| CloudError::NotFound(format!("function {name}")))?;
        f.code = code.clone();
        Ok(())
    }

    async fn delete_function(&self, name: &str) -> CloudResult<()> {
        match self.state().functions.remove(name) {
            Some(_) => Ok(()),
            None => Err(CloudError::NotFound(format!("function {name}"))),
        }
    }
}

#[async_trait]
impl Notifications for MemoryCloud {
    async fn subscribe(&self, topic: &str, protocol: &str, endpoint: &str) -> CloudResult<String> {
        let mut state = self.state();
        let id = state.next_id("");
        let arn = format!("{topic}:{id}");
        state.subscriptions.insert(
            arn.clone(),
            (topic.to_string(), protocol.to_string(), endpoint.to_string()),
        );
        Ok(arn)
    }

    async fn unsubscribe(&self, subscription: &str) -> CloudResult<()> {
        match self.state().subscriptions.remove(subscription) {
            Some(_) => Ok(()),
            None => Err(CloudError::NotFound(format!("subscription {subscription}"))),
        }
    }

    async fn publish(&self, topic: &str, subject: &str, message: &str) -> CloudResult<()> {
        self.state()
            .published
            .push((topic.to_string(), subject.to_string(), message.to_string()));
        Ok(())
    }
}

#[async_trait]
impl EventRules for MemoryCloud {
    async fn put_rule(&self, name: &str, schedule: &str) -> CloudResult<String> {
        let mut state = self.state();
        let region = state.region.clone();
        state
            .rules
            .entry(name.to_string())
            .and_modify(|(s, _)| *s = schedule.to_string())
            .or_insert_with(|| (schedule.to_string(), Vec::new()));
        Ok(format!("arn:aws:events:{region}:{ACCOUNT}:rule/{name}"))
    }

    async fn put_targets(&self, rule: &str, targets: &[RuleTarget]) -> CloudResult<()> {
        let mut state = self.state();
        let (_, existing) = state
            .rules
            .get_mut(rule)
            .ok_or_else(|| CloudError::NotFound(format!("rule {rule}")))?;
        for target in targets {
            existing.retain(|t| t.id != target.id);
            existing.push(target.clone());
        }
        Ok(())
    }

    async fn list_target_ids(&self, rule: &str) -> CloudResult<Vec<String>> {
        self.state()
            .rules
            .get(rule)
            .map(|(_, targets)| targets.iter().map(|t| t.id.clone()).collect())
            .ok_or_else(|| CloudError::NotFound(format!("rule {rule}")))
    }

    async fn remove_targets(&self, rule: &str, ids: &[String]) -> CloudResult<()> {
        let mut state = self.state();
        let (_, existing) = state
            .rules
            .get_mut(rule)
            .ok_or_else(|| CloudError::NotFound(format!("rule {rule}")))?;
        existing.retain(|t| !ids.contains(&t.id));
        Ok(())
    }

    async fn delete_rule(&self, name: &str) -> CloudResult<()> {
        let mut state = self.state();
        match state.rules.get(name) {
            None => Err(CloudError::NotFound(format!("rule {name}"))),
            Some((_, targets)) if !targets.is_empty() => Err(CloudError::api(
                "ValidationException",
                "Rule can't be deleted since it has targets.",
            )),
            Some(_) => {
                state.rules.remove(name);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Firewall for MemoryCloud {
    async fn authorize_ingress(&self, rule: &IngressRule) -> CloudResult<()> {
        let mut state = self.state();
        if state.ingress.contains(rule) {
            return Err(CloudError::api(
                "InvalidPermission.Duplicate",
                format!("the specified rule already exists on {}", rule.group_id),
            ));
        }
        state.ingress.push(rule.clone());
        Ok(())
    }

    async fn revoke_ingress(&self, rule: &IngressRule) -> CloudResult<()> {
        let mut state = self.state();
        let before = state.ingress.len();
        state.ingress.retain(|r| r != rule);
        if state.ingress.len() == before {
            return Err(CloudError::NotFound(format!("ingress rule on {}", rule.group_id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn data_key_unwraps() {
        let cloud = MemoryCloud::new();
        let key = cloud.generate_data_key("arn:aws:kms:key/app", 32).await.unwrap();
        assert_eq!(key.plaintext.len(), 32);
        assert_ne!(key.plaintext, key.ciphertext);
        assert_eq!(cloud.decrypt(&key.ciphertext).await.unwrap(), key.plaintext);
    }

    #[tokio::test]
    async fn queue_visibility_and_delete() {
        let cloud = MemoryCloud::new();
        cloud.send_message("q", "one").await.unwrap();
        cloud.send_message("q", "two").await.unwrap();

        let opts = ReceiveOptions {
            wait_secs: 0,
            ..Default::default()
        };
        let got = cloud.receive("q", opts).await.unwrap();
        assert_eq!(got.len(), 2);

        // In flight: invisible until the timeout lapses.
        assert!(cloud.receive("q", opts).await.unwrap().is_empty());

        cloud.delete_message("q", &got[0].receipt).await.unwrap();
        assert_eq!(cloud.state().queue_depth("q"), 1);
    }

    #[tokio::test]
    async fn queue_redelivers_after_visibility_expires() {
        let cloud = MemoryCloud::new();
        cloud.send_message("q", "one").await.unwrap();
        let opts = ReceiveOptions {
            max_messages: 10,
            visibility_timeout_secs: 0,
            wait_secs: 0,
        };
        let first = cloud.receive("q", opts).await.unwrap();
        let second = cloud.receive("q", opts).await.unwrap();
        assert_eq!(first[0].id, second[0].id);
        assert_ne!(first[0].receipt, second[0].receipt);
    }

    #[tokio::test]
    async fn log_tokens_are_enforced() {
        let cloud = MemoryCloud::new();
        cloud.create_log_stream("g", "s").await.unwrap();
        let ev = [LogEvent {
            timestamp_ms: 0,
            message: "hi".into(),
        }];

        let token = cloud.put_log_events("g", "s", &ev, None).await.unwrap();
        let err = cloud.put_log_events("g", "s", &ev, None).await.unwrap_err();
        assert_eq!(
            err,
            CloudError::InvalidToken {
                next: token.clone().unwrap()
            }
        );
        cloud
            .put_log_events("g", "s", &ev, token.as_deref())
            .await
            .unwrap();
        assert_eq!(cloud.state().log_lines("g"), vec!["hi", "hi"]);
    }

    #[tokio::test]
    async fn updating_stack_rejects_second_update() {
        let cloud = MemoryCloud::new();
        cloud.put_stack(Stack::new("convox-web", "UPDATE_COMPLETE"));
        cloud.state().hold_updates = true;

        let update = StackUpdate {
            stack: "convox-web".into(),
            ..Default::default()
        };
        cloud.update_stack(&update).await.unwrap();
        assert!(matches!(
            cloud.update_stack(&update).await,
            Err(CloudError::Conflict(_))
        ));

        cloud.cancel_update_stack("convox-web").await.unwrap();
        assert_eq!(cloud.state().stacks["convox-web"].status, "UPDATE_ROLLBACK_COMPLETE");
    }

    #[tokio::test]
    async fn subnet_error_lists_zones() {
        let cloud = MemoryCloud::new();
        let err = cloud.create_subnet("vpc-1", "garbage", "10.0.0.0/16").await.unwrap_err();
        assert!(err.message().contains("following availability zones: us-east-1a, us-east-1b, us-east-1c."));
    }
}
