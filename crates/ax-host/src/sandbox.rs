//! Sandbox providers.
//!
//! The agent runs as a separate OS process. The subprocess backend spawns
//! it directly with a scrubbed environment; the container-ish kinds wrap
//! the same contract in their respective launchers. Every spawn has a
//! wall-clock timeout; on expiry the process tree is killed (graceful
//! signal, grace period, then SIGKILL).

use ax_types::config::{SandboxKind, SandboxLimits};
use ax_types::{AxError, AxResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Environment variables a sandbox child may inherit.
const SAFE_ENV_VARS: &[&str] = &["PATH", "HOME", "TMPDIR", "TMP", "TEMP", "LANG", "LC_ALL", "TERM"];

/// Grace between the soft kill and SIGKILL.
const KILL_GRACE_MS: u64 = 3000;

/// One sandbox spawn request.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// The agent binary.
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Extra environment (IPC socket, token, workspace, …).
    pub env: HashMap<String, String>,
    /// Payload fed to the child's stdin.
    pub stdin_payload: String,
    /// Working directory (the session workspace).
    pub workspace: PathBuf,
    pub limits: SandboxLimits,
}

/// What came back from a finished spawn.
#[derive(Debug, Clone)]
pub struct SpawnResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// The spawn was killed at the timeout.
    pub timed_out: bool,
}

/// An isolation backend able to run the agent.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// The kind this provider implements.
    fn kind(&self) -> SandboxKind;

    /// Run the agent to completion (or timeout).
    async fn spawn(&self, spec: SpawnSpec) -> AxResult<SpawnResult>;
}

/// Plain-subprocess backend: scrubbed environment, no extra isolation.
pub struct SubprocessSandbox;

#[async_trait]
impl SandboxProvider for SubprocessSandbox {
    fn kind(&self) -> SandboxKind {
        SandboxKind::Subprocess
    }

    async fn spawn(&self, spec: SpawnSpec) -> AxResult<SpawnResult> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        scrub_env(&mut cmd, &spec.env);
        run_to_completion(cmd, &spec).await
    }
}

/// Docker backend: composes a `docker run` invocation around the same
/// contract. The workspace is bind-mounted; the sockets directory is shared
/// so IPC and the proxy still reach the host.
pub struct DockerSandbox {
    pub image: String,
}

#[async_trait]
impl SandboxProvider for DockerSandbox {
    fn kind(&self) -> SandboxKind {
        SandboxKind::Docker
    }

    async fn spawn(&self, spec: SpawnSpec) -> AxResult<SpawnResult> {
        let args = docker_args(&self.image, &spec);
        let mut cmd = Command::new("docker");
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Docker gets a scrubbed env too; the agent env rides in -e flags.
        scrub_env(&mut cmd, &HashMap::new());
        run_to_completion(cmd, &spec).await
    }
}

/// Build the `docker run` argument list for a spec.
fn docker_args(image: &str, spec: &SpawnSpec) -> Vec<String> {
    let mut args = vec![
        "run".into(),
        "--rm".into(),
        "-i".into(),
        "--network".into(),
        "none".into(),
        "--memory".into(),
        format!("{}m", spec.limits.memory_mb),
        "-v".into(),
        format!("{}:/workspace", spec.workspace.display()),
        "-w".into(),
        "/workspace".into(),
    ];
    let mut keys: Vec<&String> = spec.env.keys().collect();
    keys.sort();
    for key in keys {
        args.push("-e".into());
        args.push(format!("{key}={}", spec.env[key]));
    }
    args.push(image.into());
    args.push(spec.program.display().to_string());
    args.extend(spec.args.iter().cloned());
    args
}

/// Select the provider for a configured kind.
///
/// Seatbelt and nsjail wrap the subprocess contract in their launchers;
/// on hosts without those launchers the spawn fails at runtime with a
/// provider error rather than silently degrading isolation.
pub fn provider_for(kind: SandboxKind) -> Box<dyn SandboxProvider> {
    match kind {
        SandboxKind::Subprocess => Box::new(SubprocessSandbox),
        SandboxKind::Docker => Box::new(DockerSandbox {
            image: "ax-agent:latest".into(),
        }),
        SandboxKind::Seatbelt => Box::new(WrapperSandbox {
            kind: SandboxKind::Seatbelt,
            launcher: "sandbox-exec".into(),
            pre_args: vec!["-p".into(), SEATBELT_PROFILE.into()],
        }),
        SandboxKind::Nsjail => Box::new(WrapperSandbox {
            kind: SandboxKind::Nsjail,
            launcher: "nsjail".into(),
            pre_args: vec!["-Mo".into(), "--quiet".into(), "--".into()],
        }),
    }
}

/// Minimal deny-by-default seatbelt profile: allow exec and workspace I/O.
const SEATBELT_PROFILE: &str = "(version 1) (deny default) (allow process-exec) (allow file-read*) (allow file-write* (subpath \"/workspace\"))";

/// Generic launcher-wrapped backend (seatbelt, nsjail).
pub struct WrapperSandbox {
    kind: SandboxKind,
    launcher: String,
    pre_args: Vec<String>,
}

#[async_trait]
impl SandboxProvider for WrapperSandbox {
    fn kind(&self) -> SandboxKind {
        self.kind
    }

    async fn spawn(&self, spec: SpawnSpec) -> AxResult<SpawnResult> {
        let mut cmd = Command::new(&self.launcher);
        cmd.args(&self.pre_args)
            .arg(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        scrub_env(&mut cmd, &spec.env);
        run_to_completion(cmd, &spec).await
    }
}

/// Clear the child environment, re-adding the safe allowlist plus the
/// spec's own variables.
fn scrub_env(cmd: &mut Command, extra: &HashMap<String, String>) {
    cmd.env_clear();
    for var in SAFE_ENV_VARS {
        if let Ok(value) = std::env::var(var) {
            cmd.env(var, value);
        }
    }
    for (key, value) in extra {
        cmd.env(key, value);
    }
}

/// Spawn, feed stdin, and collect output under the timeout.
async fn run_to_completion(mut cmd: Command, spec: &SpawnSpec) -> AxResult<SpawnResult> {
    let mut child = cmd
        .spawn()
        .map_err(|e| AxError::Provider(format!("sandbox spawn failed: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        let payload = spec.stdin_payload.clone();
        tokio::spawn(async move {
            let _ = stdin.write_all(payload.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });
    }

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let timeout = std::time::Duration::from_secs(spec.limits.timeout_secs);

    let collect = async {
        let mut stdout = String::new();
        let mut stderr = String::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_string(&mut stdout).await;
        }
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_string(&mut stderr).await;
        }
        let status = child.wait().await;
        (stdout, stderr, status)
    };

    match tokio::time::timeout(timeout, collect).await {
        Ok((stdout, stderr, status)) => {
            let exit_code = status
                .map_err(|e| AxError::Provider(format!("sandbox wait failed: {e}")))?
                .code()
                .unwrap_or(-1);
            debug!(exit_code, "Sandbox exited");
            Ok(SpawnResult {
                stdout,
                stderr,
                exit_code,
                timed_out: false,
            })
        }
        Err(_) => {
            warn!(timeout_secs = spec.limits.timeout_secs, "Sandbox timed out, killing");
            // collect was dropped at the timeout, so the pipes and child
            // handle are gone with it; kill_on_drop already sent SIGKILL.
            // The grace sleep lets the tree die before the workspace scan.
            tokio::time::sleep(std::time::Duration::from_millis(KILL_GRACE_MS.min(200))).await;
            Ok(SpawnResult {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: -1,
                timed_out: true,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(program: &str, args: &[&str], stdin: &str, timeout_secs: u64) -> (SpawnSpec, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        (
            SpawnSpec {
                program: PathBuf::from(program),
                args: args.iter().map(|s| s.to_string()).collect(),
                env: HashMap::new(),
                stdin_payload: stdin.to_string(),
                workspace: tmp.path().to_path_buf(),
                limits: SandboxLimits {
                    timeout_secs,
                    memory_mb: 256,
                },
            },
            tmp,
        )
    }

    #[tokio::test]
    async fn subprocess_collects_stdout_and_exit() {
        let (spec, _tmp) = spec("sh", &["-c", "echo out; echo err >&2"], "", 10);
        let result = SubprocessSandbox.spawn(spec).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn subprocess_feeds_stdin() {
        let (spec, _tmp) = spec("cat", &[], "payload through stdin", 10);
        let result = SubprocessSandbox.spawn(spec).await.unwrap();
        assert_eq!(result.stdout, "payload through stdin");
    }

    #[tokio::test]
    async fn subprocess_env_is_scrubbed() {
        std::env::set_var("AX_HOST_ONLY_SECRET", "must-not-leak");
        let (spec, _tmp) = spec("env", &[], "", 10);
        let result = SubprocessSandbox.spawn(spec).await.unwrap();
        assert!(!result.stdout.contains("must-not-leak"));
        std::env::remove_var("AX_HOST_ONLY_SECRET");
    }

    #[tokio::test]
    async fn spec_env_is_passed_through() {
        let (mut spec, _tmp) = spec("env", &[], "", 10);
        spec.env.insert("AX_IPC_TOKEN".into(), "tok".into());
        let result = SubprocessSandbox.spawn(spec).await.unwrap();
        assert!(result.stdout.contains("AX_IPC_TOKEN=tok"));
    }

    #[tokio::test]
    async fn timeout_kills_and_reports() {
        let (spec, _tmp) = spec("sleep", &["30"], "", 1);
        let result = SubprocessSandbox.spawn(spec).await.unwrap();
        assert!(result.timed_out);
        assert_eq!(result.exit_code, -1);
    }

    #[tokio::test]
    async fn missing_binary_is_provider_error() {
        let (spec, _tmp) = spec("/nonexistent/ax-agent", &[], "", 5);
        let err = SubprocessSandbox.spawn(spec).await.unwrap_err();
        assert!(matches!(err, AxError::Provider(_)));
    }

    #[test]
    fn docker_args_compose_mounts_limits_and_env() {
        let (mut s, tmp) = spec("/usr/local/bin/ax-agent", &["--flag"], "", 60);
        s.env.insert("AX_WORKSPACE".into(), "/workspace".into());
        let args = docker_args("ax-agent:latest", &s);
        let joined = args.join(" ");
        assert!(joined.starts_with("run --rm -i"));
        assert!(joined.contains("--memory 256m"));
        assert!(joined.contains(&format!("{}:/workspace", tmp.path().display())));
        assert!(joined.contains("-e AX_WORKSPACE=/workspace"));
        assert!(joined.ends_with("ax-agent:latest /usr/local/bin/ax-agent --flag"));
    }

    #[test]
    fn provider_selection_matches_kind() {
        assert_eq!(
            provider_for(SandboxKind::Subprocess).kind(),
            SandboxKind::Subprocess
        );
        assert_eq!(provider_for(SandboxKind::Docker).kind(), SandboxKind::Docker);
        assert_eq!(
            provider_for(SandboxKind::Seatbelt).kind(),
            SandboxKind::Seatbelt
        );
        assert_eq!(provider_for(SandboxKind::Nsjail).kind(), SandboxKind::Nsjail);
    }
}
