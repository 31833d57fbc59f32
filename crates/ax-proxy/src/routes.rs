//! Vendor route allowlist.

/// How a vendor expects its credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// `x-api-key: <key>`.
    XApiKey,
}

/// One allowlisted vendor endpoint.
#[derive(Debug, Clone)]
pub struct VendorRoute {
    /// Vendor name, used in logs and audit entries.
    pub vendor: String,
    /// Request path prefixes this route accepts.
    pub path_prefixes: Vec<String>,
    /// Upstream base URL (scheme + host, no trailing slash).
    pub upstream_base: String,
    /// How the credential is attached.
    pub auth_style: AuthStyle,
    /// Environment variable in the host secret store holding the key.
    pub env_var: String,
}

impl VendorRoute {
    /// Whether this route accepts the given request path.
    pub fn matches(&self, path: &str) -> bool {
        self.path_prefixes.iter().any(|p| path.starts_with(p))
    }
}

/// The default vendor table: Anthropic-style and OpenAI-style endpoints.
pub fn default_routes() -> Vec<VendorRoute> {
    vec![
        VendorRoute {
            vendor: "anthropic".into(),
            path_prefixes: vec!["/v1/messages".into()],
            upstream_base: "https://api.anthropic.com".into(),
            auth_style: AuthStyle::XApiKey,
            env_var: "ANTHROPIC_API_KEY".into(),
        },
        VendorRoute {
            vendor: "openai".into(),
            path_prefixes: vec!["/v1/chat/completions".into()],
            upstream_base: "https://api.openai.com".into(),
            auth_style: AuthStyle::Bearer,
            env_var: "OPENAI_API_KEY".into(),
        },
    ]
}

/// Find the route for a path, if any.
pub fn match_route<'a>(routes: &'a [VendorRoute], path: &str) -> Option<&'a VendorRoute> {
    routes.iter().find(|r| r.matches(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_matches_vendor_paths() {
        let routes = default_routes();
        assert_eq!(
            match_route(&routes, "/v1/messages").unwrap().vendor,
            "anthropic"
        );
        assert_eq!(
            match_route(&routes, "/v1/chat/completions").unwrap().vendor,
            "openai"
        );
    }

    #[test]
    fn unlisted_paths_do_not_match() {
        let routes = default_routes();
        assert!(match_route(&routes, "/v1/files").is_none());
        assert!(match_route(&routes, "/admin").is_none());
        assert!(match_route(&routes, "/").is_none());
    }

    #[test]
    fn prefix_match_covers_subpaths() {
        let routes = default_routes();
        assert!(match_route(&routes, "/v1/messages/count_tokens").is_some());
    }
}
