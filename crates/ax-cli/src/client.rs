//! Minimal HTTP client for the host's Unix-socket API.

use anyhow::Context;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use hyperlocal::{UnixConnector, Uri};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Client over the api socket.
pub struct ApiClient {
    socket_path: PathBuf,
    client: Client<UnixConnector, Full<Bytes>>,
}

impl ApiClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            client: Client::builder(TokioExecutor::new()).build(UnixConnector),
        }
    }

    /// One non-streaming chat completion; returns the assistant content.
    pub async fn chat(
        &self,
        message: &str,
        agent: Option<&str>,
        session: Option<&str>,
    ) -> anyhow::Result<String> {
        let mut body = json!({
            "model": agent.map(|a| format!("ax:{a}")).unwrap_or_else(|| "ax".into()),
            "messages": [{"role": "user", "content": message}],
        });
        if let Some(session) = session {
            body["session_id"] = Value::String(session.to_string());
        }

        let uri: hyper::Uri = Uri::new(&self.socket_path, "/v1/chat/completions").into();
        let request = hyper::Request::post(uri)
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(serde_json::to_vec(&body)?)))
            .context("building request")?;

        let response = self
            .client
            .request(request)
            .await
            .with_context(|| format!("is the host running? ({})", self.socket_path.display()))?;

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .context("reading response")?
            .to_bytes();

        let parsed: Value = serde_json::from_slice(&bytes).context("parsing response")?;
        if !status.is_success() {
            let message = parsed
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("request failed");
            anyhow::bail!("{status}: {message}");
        }

        Ok(parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}
