//! Credential-injecting forward proxy.
//!
//! The sandboxed agent must talk to model-provider HTTP endpoints without
//! ever possessing API keys. The host runs an HTTP proxy on a local Unix
//! socket that validates the request path against a vendor allowlist,
//! strips any authentication headers the agent may have set, injects the
//! real credential from the host's secret store, and streams the upstream
//! response back unchanged.
//!
//! Inside the sandbox, a TCP listener bridges the agent's model SDK (which
//! expects a plain `http://127.0.0.1:<port>` base URL) onto the host
//! socket, byte-preserving and policy-free: all policy lives host-side.

pub mod bridge;
pub mod oauth;
pub mod routes;
pub mod server;

pub use bridge::Bridge;
pub use oauth::{rewrite_env_tokens, OauthToken, REFRESH_WINDOW_SECS};
pub use routes::{AuthStyle, VendorRoute};
pub use server::{CredentialProxy, SecretResolver};
