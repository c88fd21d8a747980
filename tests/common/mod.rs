//! A scripted HTTP/1.1 server for driving the client in tests.
//!
//! Each accepted connection is answered with the next scripted response and
//! then closed, so requests are served strictly in script order.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use duneapi_client::{ClientConfig, DuneClient, RetryPolicy};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

pub const API_KEY: &str = "test-key";
pub const EXECUTION_ID: &str = "01HXXXXXXXXXXXXXXXXXXXXXXX";

#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ScriptedResponse {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.to_string(),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path plus query string.
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub struct MockServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockServer {
    pub async fn start(script: Vec<ScriptedResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let base_url = format!("http://{}", listener.local_addr().expect("local addr"));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            for response in script {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let (read_half, mut write_half) = stream.split();
                let mut reader = BufReader::new(read_half);

                let Some(request) = read_request(&mut reader).await else {
                    continue;
                };
                recorded.lock().unwrap().push(request);

                let mut raw = format!(
                    "HTTP/1.1 {} Scripted\r\nContent-Length: {}\r\nConnection: close\r\n",
                    response.status,
                    response.body.len()
                );
                for (name, value) in &response.headers {
                    raw.push_str(&format!("{name}: {value}\r\n"));
                }
                raw.push_str("\r\n");
                raw.push_str(&response.body);

                let _ = write_half.write_all(raw.as_bytes()).await;
                let _ = write_half.shutdown().await;
            }
        });

        Self { base_url, requests }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Config pointing at this server with fast retries.
    pub fn config(&self) -> ClientConfig {
        ClientConfig::from_api_key(API_KEY)
            .with_host(&self.base_url)
            .with_retry_policy(fast_retry_policy(3))
            .with_timeout(Duration::from_secs(5))
    }

    pub fn client(&self) -> DuneClient {
        DuneClient::new(&self.config()).expect("build client")
    }
}

pub fn fast_retry_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        jitter: Duration::ZERO,
        ..RetryPolicy::default()
    }
}

async fn read_request<R>(reader: &mut BufReader<R>) -> Option<RecordedRequest>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.ok()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':')?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).await.ok()?;

    Some(RecordedRequest {
        method,
        target,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

pub fn rows(range: std::ops::Range<i64>) -> Vec<serde_json::Value> {
    range.map(|i| serde_json::json!({ "n": i })).collect()
}

/// A completed results page as the server would send it.
pub fn completed_page(rows: Vec<serde_json::Value>, next_offset: Option<u64>) -> serde_json::Value {
    let count = rows.len();
    let mut page = serde_json::json!({
        "execution_id": EXECUTION_ID,
        "query_id": 42,
        "state": "QUERY_STATE_COMPLETED",
        "submitted_at": "2024-05-01T10:00:00Z",
        "execution_started_at": "2024-05-01T10:00:01Z",
        "execution_ended_at": "2024-05-01T10:00:04Z",
        "is_execution_finished": true,
        "result": {
            "metadata": {
                "column_names": ["n"],
                "row_count": count,
                "result_set_bytes": 8 * count,
                "datapoint_count": count,
                "total_row_count": 5
            },
            "rows": rows
        }
    });
    if let Some(offset) = next_offset {
        page["next_offset"] = offset.into();
    }
    page
}

pub fn running_page(state: &str) -> serde_json::Value {
    serde_json::json!({
        "execution_id": EXECUTION_ID,
        "query_id": 42,
        "state": state,
        "submitted_at": "2024-05-01T10:00:00Z",
        "is_execution_finished": false
    })
}
