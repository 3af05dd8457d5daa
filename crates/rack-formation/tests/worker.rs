use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request as HttpRequest, Response as HttpResponse};
use hyper_util::rt::TokioIo;
use rack_cloud::{
    Cloud, CloudError, CloudResult, MemoryCloud, Queue, QueueMessage, ReceiveOptions,
};
use rack_formation::{
    Dispatcher, Disposition, FormationResult, FormationWorker, HandlerContext, HttpResponder,
    REQUEST_SUBJECT, Responder, Response, Status,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Notify;

const QUEUE: &str = "convox-formation";

/// Records every reply instead of sending it.
#[derive(Default)]
struct Captured {
    replies: Mutex<Vec<(String, Response)>>,
    fail: bool,
}

#[async_trait]
impl Responder for Captured {
    async fn respond(&self, url: &str, response: &Response) -> FormationResult<()> {
        if self.fail {
            return Err(rack_formation::FormationError::Response("unreachable".into()));
        }
        self.replies
            .lock()
            .unwrap()
            .push((url.to_string(), response.clone()));
        Ok(())
    }
}

fn envelope(message: Value) -> String {
    json!({
        "Type": "Notification",
        "Subject": REQUEST_SUBJECT,
        "Message": message.to_string(),
    })
    .to_string()
}

fn service_request(request_type: &str, physical: Option<&str>, port: u32) -> Value {
    let mut req = json!({
        "RequestType": request_type,
        "ResourceType": "Custom::ECSService",
        "RequestId": format!("req-{request_type}-{port}"),
        "StackId": "arn:aws:cloudformation:us-east-1:123456789012:stack/convox-myapp/uuid",
        "LogicalResourceId": "WebECSService",
        "ResponseURL": "https://engine.example.org/reply",
        "ResourceProperties": {
            "Cluster": "convox-cluster",
            "DesiredCount": "2",
            "Name": "web",
            "TaskDefinition": "arn:aws:ecs:us-east-1:123456789012:task-definition/convox-myapp-web:1",
            "Role": "arn:aws:iam::123456789012:role/ecs-service",
            "LoadBalancers": [format!("mylb||web||{port}")],
            "DeploymentMinimumPercent": "50",
            "DeploymentMaximumPercent": "200",
        },
    });
    if let Some(id) = physical {
        req["PhysicalResourceId"] = json!(id);
    }
    req
}

fn worker(cloud: Cloud, responder: Arc<dyn Responder>) -> FormationWorker {
    let mut ctx = HandlerContext::new(cloud.clone());
    ctx.delete_retry.delay = Duration::ZERO;
    FormationWorker::new(cloud.queue.clone(), QUEUE, Dispatcher::new(ctx), responder)
        .with_receive_options(ReceiveOptions {
            wait_secs: 0,
            ..ReceiveOptions::default()
        })
}

/// Receives from the memory queue but refuses every delete.
struct UndeletableQueue(Arc<MemoryCloud>);

#[async_trait]
impl Queue for UndeletableQueue {
    async fn receive(&self, queue: &str, opts: ReceiveOptions) -> CloudResult<Vec<QueueMessage>> {
        self.0.receive(queue, opts).await
    }

    async fn delete_message(&self, _queue: &str, _receipt: &str) -> CloudResult<()> {
        Err(CloudError::Throttled("delete".into()))
    }

    async fn send_message(&self, queue: &str, body: &str) -> CloudResult<String> {
        self.0.send_message(queue, body).await
    }
}

/// Holds each reply until the test lets it through.
#[derive(Default)]
struct Gated {
    started: Notify,
    release: Notify,
    replies: Mutex<usize>,
}

#[async_trait]
impl Responder for Gated {
    async fn respond(&self, _url: &str, _response: &Response) -> FormationResult<()> {
        self.started.notify_one();
        self.release.notified().await;
        *self.replies.lock().unwrap() += 1;
        Ok(())
    }
}

fn math_request(id: &str) -> Value {
    json!({
        "RequestType": "Create",
        "ResourceType": "Custom::MathMin",
        "RequestId": id,
        "StackId": "arn:aws:cloudformation:us-east-1:123456789012:stack/convox-myapp/uuid",
        "LogicalResourceId": "Smaller",
        "ResponseURL": "https://engine.example.org/reply",
        "ResourceProperties": {"X": "3", "Y": "1"},
    })
}

fn last_reply(captured: &Captured) -> Response {
    captured.replies.lock().unwrap().last().unwrap().1.clone()
}

#[tokio::test]
async fn service_create_replace_and_delete() {
    let (cloud, memory) = Cloud::memory();
    let captured = Arc::new(Captured::default());
    let worker = worker(cloud, captured.clone());

    memory.send_message(QUEUE, &envelope(service_request("Create", None, 80))).await.unwrap();
    assert_eq!(worker.tick().await.unwrap(), vec![Disposition::Answered]);
    let created = last_reply(&captured);
    assert_eq!(created.status, Status::Success);
    let first = created.physical_resource_id.clone();
    {
        let state = memory.state();
        let svc = state.services.values().next().unwrap();
        assert_eq!(svc.arn, first);
        assert!(svc.role.is_some());
        assert_eq!(svc.load_balancers.len(), 1);
        let deployment = svc.deployment.clone().unwrap();
        assert_eq!((deployment.minimum_percent, deployment.maximum_percent), (50, 200));
    }

    memory
        .send_message(QUEUE, &envelope(service_request("Update", Some(&first), 443)))
        .await
        .unwrap();
    worker.tick().await.unwrap();
    let replaced = last_reply(&captured);
    assert_eq!(replaced.status, Status::Success);
    assert_ne!(replaced.physical_resource_id, first);
    assert_eq!(memory.state().services.len(), 2);

    memory
        .send_message(QUEUE, &envelope(service_request("Delete", Some(&first), 80)))
        .await
        .unwrap();
    worker.tick().await.unwrap();
    assert_eq!(last_reply(&captured).status, Status::Success);
    assert_eq!(memory.state().services.len(), 1);
    assert_eq!(memory.state().queue_depth(QUEUE), 0);
}

#[tokio::test]
async fn non_requests_and_garbage_are_dropped() {
    let (cloud, memory) = Cloud::memory();
    let captured = Arc::new(Captured::default());
    let worker = worker(cloud, captured.clone());

    let other = json!({"Subject": "something else", "Message": "{}"}).to_string();
    memory.send_message(QUEUE, &other).await.unwrap();
    memory.send_message(QUEUE, "not json").await.unwrap();
    let bad_request = json!({"Subject": REQUEST_SUBJECT, "Message": "{\"RequestType\": 1}"}).to_string();
    memory.send_message(QUEUE, &bad_request).await.unwrap();

    assert_eq!(
        worker.tick().await.unwrap(),
        vec![Disposition::Dropped, Disposition::Dropped, Disposition::Dropped]
    );
    assert!(captured.replies.lock().unwrap().is_empty());
    assert_eq!(memory.state().queue_depth(QUEUE), 0);
}

#[tokio::test]
async fn undelivered_reply_is_retained() {
    let (cloud, memory) = Cloud::memory();
    let responder = Arc::new(Captured {
        fail: true,
        ..Default::default()
    });
    let worker = worker(cloud, responder);

    let req = json!({
        "RequestType": "Create",
        "ResourceType": "Custom::MathMin",
        "RequestId": "req-1",
        "StackId": "arn:aws:cloudformation:us-east-1:123456789012:stack/convox-myapp/uuid",
        "LogicalResourceId": "Smaller",
        "ResponseURL": "https://engine.example.org/reply",
        "ResourceProperties": {"X": "3", "Y": "1"},
    });
    memory.send_message(QUEUE, &envelope(req)).await.unwrap();
    assert_eq!(worker.tick().await.unwrap(), vec![Disposition::Retained]);
    assert_eq!(memory.state().queue_depth(QUEUE), 1);
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let (cloud, _) = Cloud::memory();
    let worker = worker(cloud, Arc::new(Captured::default()));
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(worker.run(rx));
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn failed_delete_does_not_abandon_the_batch() {
    let (cloud, memory) = Cloud::memory();
    let captured = Arc::new(Captured::default());
    let dispatcher = Dispatcher::new(HandlerContext::new(cloud));
    let worker = FormationWorker::new(
        Arc::new(UndeletableQueue(memory.clone())),
        QUEUE,
        dispatcher,
        captured.clone(),
    )
    .with_receive_options(ReceiveOptions {
        wait_secs: 0,
        ..ReceiveOptions::default()
    });

    for id in ["req-1", "req-2", "req-3"] {
        memory.send_message(QUEUE, &envelope(math_request(id))).await.unwrap();
    }
    assert_eq!(worker.tick().await.unwrap(), vec![Disposition::Answered; 3]);
    assert_eq!(captured.replies.lock().unwrap().len(), 3);
    assert_eq!(memory.state().queue_depth(QUEUE), 3);
}

#[tokio::test]
async fn shutdown_lets_the_batch_in_hand_finish() {
    let (cloud, memory) = Cloud::memory();
    let gated = Arc::new(Gated::default());
    let worker = worker(cloud, gated.clone());
    memory.send_message(QUEUE, &envelope(math_request("req-1"))).await.unwrap();

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(worker.run(rx));
    gated.started.notified().await;
    tx.send(true).unwrap();
    gated.release.notify_one();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(*gated.replies.lock().unwrap(), 1);
    assert_eq!(memory.state().queue_depth(QUEUE), 0);
}

// ── HTTP responder ─────────────────────────────────────────────────

type Seen = Arc<Mutex<Vec<(String, Option<String>, Value)>>>;

async fn reply_server(status: u16) -> (SocketAddr, Seen) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen: Seen = Arc::default();
    let sink = seen.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let sink = sink.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |req: HttpRequest<Incoming>| {
                    let sink = sink.clone();
                    async move {
                        let method = req.method().to_string();
                        let content_type = req
                            .headers()
                            .get("content-type")
                            .and_then(|v| v.to_str().ok())
                            .map(String::from);
                        let body = req.into_body().collect().await?.to_bytes();
                        let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
                        sink.lock().unwrap().push((method, content_type, json));
                        Ok::<_, hyper::Error>(
                            HttpResponse::builder()
                                .status(status)
                                .body(Full::new(Bytes::new()))
                                .unwrap(),
                        )
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await;
            });
        }
    });
    (addr, seen)
}

fn sample_response(status: Status) -> Response {
    Response {
        request_id: "req-1".into(),
        stack_id: "stack".into(),
        logical_resource_id: "Thing".into(),
        physical_resource_id: "thing-1".into(),
        status,
        reason: None,
        data: [("Value".to_string(), "1".to_string())].into(),
    }
}

#[tokio::test]
async fn http_responder_puts_json() {
    let (addr, seen) = reply_server(200).await;
    let responder = HttpResponder::new(Duration::from_secs(5)).unwrap();
    responder
        .respond(&format!("http://{addr}/signed?x=1"), &sample_response(Status::Success))
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (method, content_type, body) = &seen[0];
    assert_eq!(method, "PUT");
    assert_eq!(content_type.as_deref(), Some(""));
    assert_eq!(body["Status"], "SUCCESS");
    assert_eq!(body["PhysicalResourceId"], "thing-1");
    assert_eq!(body["Data"]["Value"], "1");
}

#[tokio::test]
async fn http_responder_rejects_error_status() {
    let (addr, _) = reply_server(403).await;
    let responder = HttpResponder::new(Duration::from_secs(5)).unwrap();
    let err = responder
        .respond(&format!("http://{addr}/signed"), &sample_response(Status::Failed))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("403"), "{err}");
}
