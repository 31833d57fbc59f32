//! Agent-side TCP→Unix-socket bridge.
//!
//! Model SDKs issue plain TCP HTTP requests to a configurable base URL. The
//! bridge listens on an ephemeral 127.0.0.1 port inside the sandbox and
//! forwards every connection to the host's proxy socket, byte-preserving in
//! both directions, so SSE streams pass through untouched. The bridge holds
//! no policy; if the host socket is unreachable it answers 502.

use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Minimal 502 answer for when the host socket is down.
const BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";

/// The TCP→UDS forwarder.
pub struct Bridge {
    listener: Option<TcpListener>,
    port: u16,
    socket_path: PathBuf,
    shutdown: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Bridge {
    /// Bind an ephemeral port on 127.0.0.1 forwarding to `socket_path`.
    pub async fn bind(socket_path: PathBuf) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        let (shutdown, shutdown_rx) = watch::channel(false);
        Ok(Self {
            listener: Some(listener),
            port,
            socket_path,
            shutdown,
            shutdown_rx,
        })
    }

    /// The bound port; the model SDK's base URL is
    /// `http://127.0.0.1:<port>`.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Start the accept loop.
    pub fn start(&mut self) -> JoinHandle<()> {
        let listener = self
            .listener
            .take()
            .expect("Bridge::start called twice");
        let socket_path = self.socket_path.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            info!(port = listener.local_addr().map(|a| a.port()).unwrap_or(0), "Bridge listening");
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let path = socket_path.clone();
                                tokio::spawn(async move {
                                    forward(stream, path).await;
                                });
                            }
                            Err(e) => warn!(error = %e, "Bridge accept failed"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!("Bridge shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Signal the accept loop to stop.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Forward one TCP connection to the host socket.
async fn forward(mut tcp: TcpStream, socket_path: PathBuf) {
    let mut uds = match UnixStream::connect(&socket_path).await {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %socket_path.display(), error = %e, "Host socket unreachable");
            let _ = tcp.write_all(BAD_GATEWAY).await;
            let _ = tcp.shutdown().await;
            return;
        }
    };

    match tokio::io::copy_bidirectional(&mut tcp, &mut uds).await {
        Ok((to_host, to_agent)) => {
            debug!(to_host, to_agent, "Bridge connection closed");
        }
        Err(e) => {
            debug!(error = %e, "Bridge copy ended with error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn bytes_pass_through_both_ways() {
        let tmp = tempfile::tempdir().unwrap();
        let sock = tmp.path().join("proxy.sock");

        // Host-side echo server: read a line, answer with a prefix.
        let listener = UnixListener::bind(&sock).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            let mut reply = b"echo:".to_vec();
            reply.extend_from_slice(&buf[..n]);
            stream.write_all(&reply).await.unwrap();
        });

        let mut bridge = Bridge::bind(sock).await.unwrap();
        let port = bridge.port();
        let _handle = bridge.start();

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client.write_all(b"GET / HTTP/1.1").await.unwrap();
        let mut buf = vec![0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"echo:GET / HTTP/1.1");

        bridge.stop();
    }

    #[tokio::test]
    async fn unreachable_host_socket_yields_502() {
        let tmp = tempfile::tempdir().unwrap();
        let sock = tmp.path().join("missing.sock");

        let mut bridge = Bridge::bind(sock).await.unwrap();
        let port = bridge.port();
        let _handle = bridge.start();

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 502"), "{response}");

        bridge.stop();
    }

    #[tokio::test]
    async fn port_is_ephemeral_and_nonzero() {
        let tmp = tempfile::tempdir().unwrap();
        let bridge = Bridge::bind(tmp.path().join("p.sock")).await.unwrap();
        assert_ne!(bridge.port(), 0);
    }
}
