use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_3210")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Upper bound on in-flight HTTP requests (backpressure).
    #[serde(default = "d_256")]
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3210,
            host: "127.0.0.1".into(),
            cors: CorsConfig::default(),
            max_concurrent_requests: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. Use `["*"]` for permissive (NOT recommended).
    /// Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_3210() -> u16 {
    3210
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_256() -> usize {
    256
}
fn d_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:*".into(),
        "http://127.0.0.1:*".into(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_empty_toml_uses_all_defaults() {
        let cfg: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.port, 3210);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.max_concurrent_requests, 256);
    }

    #[test]
    fn server_config_parses_host_and_port() {
        let toml_str = r#"
            port = 8080
            host = "0.0.0.0"
        "#;
        let cfg: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.host, "0.0.0.0");
    }
}
