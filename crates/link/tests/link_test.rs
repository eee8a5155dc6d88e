//! Integration tests for the job link.
//!
//! Tests verify one-shot job delivery, result hand-off, unknown-token
//! rejection and several workers talking to one server at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use forkstress_core::{DispatchMode, ExecMode, Job, Status, TestResult};
use forkstress_link::{LinkClient, LinkEndpoint, LinkError, LinkHandler, LinkServer};

const SETTLE: Duration = Duration::from_millis(200);

/// Handler keeping per-token state behind a plain mutex.
#[derive(Default)]
struct MapHandler {
    jobs: Mutex<HashMap<String, Option<Job>>>,
    results: Mutex<HashMap<String, TestResult>>,
}

impl MapHandler {
    fn with_tokens(tokens: &[&str]) -> Arc<Self> {
        let handler = Self::default();
        for token in tokens {
            handler
                .jobs
                .lock()
                .unwrap()
                .insert(token.to_string(), Some(job(token)));
        }
        Arc::new(handler)
    }
}

#[async_trait]
impl LinkHandler for MapHandler {
    async fn pull_job(&self, token: &str) -> Result<Option<Job>, LinkError> {
        let mut jobs = self.jobs.lock().unwrap();
        let slot = jobs
            .get_mut(token)
            .ok_or_else(|| LinkError::UnknownToken(token.to_string()))?;
        Ok(slot.take())
    }

    async fn push_result(&self, token: &str, result: TestResult) -> Result<(), LinkError> {
        if !self.jobs.lock().unwrap().contains_key(token) {
            return Err(LinkError::UnknownToken(token.to_string()));
        }
        let mut results = self.results.lock().unwrap();
        if results.contains_key(token) {
            return Err(LinkError::Protocol(format!("{token} already published a result")));
        }
        results.insert(token.to_string(), result);
        Ok(())
    }
}

fn job(name: &str) -> Job {
    Job::uniform(
        format!("t.{name}"),
        "builtin.racy_counter",
        &["actor1", "actor2"],
        ExecMode::Tier1,
        DispatchMode::Forked,
    )
}

async fn start(handler: Arc<MapHandler>) -> (LinkServer, LinkEndpoint) {
    let server = LinkServer::bind("127.0.0.1", handler).await.unwrap();
    let endpoint = server.endpoint().clone();
    assert_ne!(endpoint.port, 0, "bound port should be resolved");
    tokio::time::sleep(SETTLE).await;
    (server, endpoint)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_is_delivered_once() {
    let handler = MapHandler::with_tokens(&["fork-token-1"]);
    let (server, endpoint) = start(handler).await;

    let client = LinkClient::connect(&endpoint).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    let first = client.pull_job("fork-token-1").await.unwrap();
    assert_eq!(first.map(|j| j.name), Some("t.fork-token-1".to_string()));

    let second = client.pull_job("fork-token-1").await.unwrap();
    assert!(second.is_none(), "second pull must not deliver the job again");

    server.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_token_is_rejected() {
    let handler = MapHandler::with_tokens(&[]);
    let (server, endpoint) = start(handler).await;

    let client = LinkClient::connect(&endpoint).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    let err = client.pull_job("fork-token-404").await.unwrap_err();
    match err {
        LinkError::Protocol(reason) => assert!(reason.contains("fork-token-404")),
        other => panic!("expected protocol error, got {other:?}"),
    }

    server.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn result_push_is_acknowledged_once() {
    let handler = MapHandler::with_tokens(&["fork-token-7"]);
    let (server, endpoint) = start(Arc::clone(&handler)).await;

    let client = LinkClient::connect(&endpoint).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    let job = Arc::new(client.pull_job("fork-token-7").await.unwrap().unwrap());
    let mut result = TestResult::new(Arc::clone(&job), Status::Normal);
    result.add_state("1, 1", 42);

    client.push_result("fork-token-7", result.clone()).await.unwrap();
    assert!(client.push_result("fork-token-7", result).await.is_err());

    let results = handler.results.lock().unwrap();
    let stored = results.get("fork-token-7").expect("result stored");
    assert_eq!(stored.count("1, 1"), 42);
    assert_eq!(stored.name(), "t.fork-token-7");
    drop(results);

    server.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers() {
    let tokens = ["fork-token-1", "fork-token-2", "fork-token-3", "fork-token-4"];
    let handler = MapHandler::with_tokens(&tokens);
    let (server, endpoint) = start(Arc::clone(&handler)).await;

    let mut handles = Vec::new();
    for token in tokens {
        let endpoint = endpoint.clone();
        handles.push(tokio::spawn(async move {
            let client = LinkClient::connect(&endpoint).await.unwrap();
            tokio::time::sleep(SETTLE).await;
            let job = Arc::new(client.pull_job(token).await.unwrap().expect("job"));
            client
                .push_result(token, TestResult::new(job, Status::Normal))
                .await
                .unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert_eq!(handler.results.lock().unwrap().len(), tokens.len());
    server.terminate().await;
}
