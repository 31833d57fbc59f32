//! Agent-side IPC client.
//!
//! Connects to the host socket, presents the spawn token, and exposes one
//! blocking-style async `call` per request. The protocol is strictly
//! request/response on a single connection, so no multiplexing machinery is
//! needed.

use ax_wire::framing::{read_frame, write_frame};
use ax_wire::response::IpcResponse;
use serde_json::{json, Value};
use std::path::Path;
use tokio::net::UnixStream;

/// A connected, authenticated IPC client.
#[derive(Debug)]
pub struct IpcClient {
    stream: UnixStream,
}

impl IpcClient {
    /// Connect to the host socket and perform the hello handshake.
    pub async fn connect(socket_path: &Path, token: &str) -> Result<Self, String> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|e| format!("cannot reach host socket: {e}"))?;
        let mut client = Self { stream };

        let hello = json!({"hello": {"token": token}});
        let ack = client.roundtrip(&hello).await?;
        if !ack.is_ok() {
            return Err(ack
                .error()
                .unwrap_or("handshake rejected")
                .to_string());
        }
        Ok(client)
    }

    /// Issue one action call. `payload` must already carry the `action`
    /// field. Returns the response body on `{ok:true}`, the error string on
    /// `{ok:false}`.
    pub async fn call(&mut self, payload: Value) -> Result<Value, String> {
        let response = self.roundtrip(&payload).await?;
        if response.is_ok() {
            Ok(response.as_value().clone())
        } else {
            Err(response.error().unwrap_or("unknown error").to_string())
        }
    }

    /// Build the payload from an action name and fields, then call.
    pub async fn call_action(
        &mut self,
        action: &str,
        mut fields: serde_json::Map<String, Value>,
    ) -> Result<Value, String> {
        fields.insert("action".to_string(), Value::String(action.to_string()));
        self.call(Value::Object(fields)).await
    }

    async fn roundtrip(&mut self, payload: &Value) -> Result<IpcResponse, String> {
        let bytes = serde_json::to_vec(payload).map_err(|e| e.to_string())?;
        write_frame(&mut self.stream, &bytes)
            .await
            .map_err(|e| format!("write failed: {e}"))?;
        let reply = read_frame(&mut self.stream)
            .await
            .map_err(|e| format!("read failed: {e}"))?
            .ok_or("host closed the connection")?;
        IpcResponse::from_bytes(&reply)
    }
}
