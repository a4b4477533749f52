use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::fixtures::{certificate_for, encode, x509_leaf, LOG_KEY};

/// One in-memory CT log whose tree grows on demand.
#[derive(Clone)]
pub struct MockLog {
    name: String,
    key: Vec<u8>,
    tree_size: Arc<AtomicU64>,
    sth_failures: Arc<AtomicUsize>,
    entry_failures: Arc<Mutex<HashMap<u64, usize>>>,
    sth_delay_ms: Arc<AtomicU64>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockLog {
    pub fn new(name: &str, tree_size: u64) -> Self {
        Self::with_key(name, tree_size, LOG_KEY.to_vec())
    }

    pub fn with_key(name: &str, tree_size: u64, key: Vec<u8>) -> Self {
        Self {
            name: name.to_owned(),
            key,
            tree_size: Arc::new(AtomicU64::new(tree_size)),
            sth_failures: Arc::new(AtomicUsize::new(0)),
            entry_failures: Arc::new(Mutex::new(HashMap::new())),
            sth_delay_ms: Arc::new(AtomicU64::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tree_size(&self) -> u64 {
        self.tree_size.load(Ordering::SeqCst)
    }

    pub fn set_tree_size(&self, size: u64) {
        self.tree_size.store(size, Ordering::SeqCst);
    }

    pub fn grow(&self, delta: u64) -> u64 {
        self.tree_size.fetch_add(delta, Ordering::SeqCst) + delta
    }

    /// Fails the next `count` get-sth requests with HTTP 503.
    pub fn fail_next_sth(&self, count: usize) {
        self.sth_failures.store(count, Ordering::SeqCst);
    }

    /// Fails the next `count` get-entries requests starting at `start`.
    pub fn fail_entries_at(&self, start: u64, count: usize) {
        self.entry_failures
            .lock()
            .expect("mock log poisoned")
            .insert(start, count);
    }

    pub fn delay_sth(&self, delay: Duration) {
        self.sth_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Raw request lines seen so far, e.g. `get-entries?start=0&end=31`.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("mock log poisoned").clone()
    }

    fn record(&self, line: String) {
        self.requests.lock().expect("mock log poisoned").push(line);
    }

    fn take_entry_failure(&self, start: u64) -> bool {
        let mut failures = self.entry_failures.lock().expect("mock log poisoned");
        match failures.get_mut(&start) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    async fn get_sth(&self) -> Response<Body> {
        self.record("get-sth".to_owned());
        let delay = self.sth_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let failing = self
            .sth_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return status(StatusCode::SERVICE_UNAVAILABLE, "try again later");
        }

        json_response(json!({
            "tree_size": self.tree_size(),
            "timestamp": 1_700_000_000_000u64,
            "sha256_root_hash": encode(&[0u8; 32]),
            "tree_head_signature": encode(b"unsigned"),
        }))
    }

    fn get_entries(&self, query: &str) -> Response<Body> {
        self.record(format!("get-entries?{query}"));

        let params = parse_query(query);
        let (Some(start), Some(end)) = (params.get("start"), params.get("end")) else {
            return status(StatusCode::BAD_REQUEST, "start and end are required");
        };
        let size = self.tree_size();
        if start > end || *start >= size {
            return status(StatusCode::BAD_REQUEST, "invalid range");
        }
        if self.take_entry_failure(*start) {
            return status(StatusCode::SERVICE_UNAVAILABLE, "try again later");
        }

        let last = (*end).min(size - 1);
        let entries = (*start..=last)
            .map(|index| {
                json!({
                    "leaf_input": encode(&x509_leaf(certificate_for(index))),
                    "extra_data": "",
                })
            })
            .collect::<Vec<_>>();
        json_response(json!({ "entries": entries }))
    }
}

pub struct MockLogServer {
    base_url: String,
    logs: Vec<MockLog>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockLogServer {
    pub async fn start(logs: Vec<MockLog>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock log listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let base_url = format!("http://{addr}");
        let state = Arc::new(ServerState {
            base_url: base_url.clone(),
            logs: logs.clone(),
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let state = state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| serve_request(state.clone(), req)))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock log server stopped: {err}");
            }
        });

        Ok(Self {
            base_url,
            logs,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Base URL of the named log, with a trailing slash.
    pub fn log_url(&self, name: &str) -> String {
        format!("{}/logs/{name}/", self.base_url)
    }

    pub fn log_list_url(&self) -> String {
        format!("{}/log_list.json", self.base_url)
    }

    pub fn log(&self, name: &str) -> &MockLog {
        self.logs
            .iter()
            .find(|log| log.name() == name)
            .expect("unknown mock log")
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

struct ServerState {
    base_url: String,
    logs: Vec<MockLog>,
}

impl ServerState {
    fn log_list(&self) -> Response<Body> {
        let logs = self
            .logs
            .iter()
            .map(|log| {
                json!({
                    "description": format!("Mock log {}", log.name()),
                    "key": encode(&log.key),
                    "url": format!("{}/logs/{}/", self.base_url, log.name()),
                })
            })
            .collect::<Vec<_>>();
        json_response(json!({
            "version": "3.0",
            "operators": [{ "name": "Mock", "logs": logs }],
        }))
    }
}

async fn serve_request(
    state: Arc<ServerState>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET {
        return Ok(status(StatusCode::METHOD_NOT_ALLOWED, "Unsupported method"));
    }

    let path = req.uri().path().to_owned();
    let query = req.uri().query().unwrap_or_default().to_owned();

    if path == "/log_list.json" {
        return Ok(state.log_list());
    }

    let segments = path.trim_matches('/').split('/').collect::<Vec<_>>();
    let response = match segments.as_slice() {
        ["logs", name, "ct", "v1", endpoint] => {
            match state.logs.iter().find(|log| log.name() == *name) {
                Some(log) if *endpoint == "get-sth" => log.get_sth().await,
                Some(log) if *endpoint == "get-entries" => log.get_entries(&query),
                Some(_) => status(StatusCode::NOT_FOUND, "unknown endpoint"),
                None => status(StatusCode::NOT_FOUND, "unknown log"),
            }
        }
        _ => status(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

fn parse_query(query: &str) -> HashMap<String, u64> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter_map(|(key, value)| value.parse::<u64>().ok().map(|v| (key.to_owned(), v)))
        .collect()
}

fn json_response(value: Value) -> Response<Body> {
    let mut response = Response::new(Body::from(value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn status(code: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(message.to_owned()));
    *response.status_mut() = code;
    response
}
