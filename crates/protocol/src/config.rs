use serde::{Deserialize, Serialize};

/// Top-level relay configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ice: IceConfig,
    #[serde(default)]
    pub receiver: ReceiverConfig,
    #[serde(default)]
    pub signaling: SignalingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the single HTTP listener serving `/ws`, `/offer`,
    /// `/config`, `/health` and static assets.
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL of the upstream signaling endpoint, surfaced verbatim in
    /// `GET /config` (advisory only — §4.2).
    #[serde(default = "default_sender_url")]
    pub sender_url: String,
    /// Directory of consumer static assets (HTML/JS), served adjacent to
    /// the binary. Out of scope beyond not leaking its absolute path.
    #[serde(default = "default_web_root")]
    pub web_root: String,
}

/// STUN server configuration for NAT traversal. The relay uses STUN-only
/// ICE (§4.3) — no TURN, since transcoding/mixing through a TURN relay is
/// not part of this core's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceConfig {
    #[serde(default = "default_stun_urls")]
    pub stun_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Capacity of each receiver's outbound text-message queue (§4.5).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Upper bound on downstream ICE gathering before answering anyway
    /// (§4.2).
    #[serde(default = "default_ice_gather_timeout_secs")]
    pub ice_gather_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Idle read deadline for the upstream signaling socket (§4.1).
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Write deadline for upstream signaling sends (§4.1).
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    /// Interval between framing-level keepalives (§4.1).
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_sender_url() -> String {
    "ws://localhost:8080/ws".to_string()
}
fn default_web_root() -> String {
    "./web".to_string()
}
fn default_stun_urls() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}
fn default_queue_capacity() -> usize {
    100
}
fn default_ice_gather_timeout_secs() -> u64 {
    3
}
fn default_read_timeout_secs() -> u64 {
    120
}
fn default_write_timeout_secs() -> u64 {
    10
}
fn default_keepalive_interval_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            sender_url: default_sender_url(),
            web_root: default_web_root(),
        }
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_urls: default_stun_urls(),
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            ice_gather_timeout_secs: default_ice_gather_timeout_secs(),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_read_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            ice: IceConfig::default(),
            receiver: ReceiverConfig::default(),
            signaling: SignalingConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Validate configuration semantics, returning a list of issues.
    /// Entries prefixed "ERROR:" are fatal; "WARNING:" entries are
    /// advisory and the relay still starts.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push("ERROR: server.port must be between 1 and 65535, got 0.".to_string());
        }
        if self.receiver.queue_capacity == 0 {
            issues.push(
                "ERROR: receiver.queue_capacity must be at least 1, got 0.".to_string(),
            );
        }
        if self.ice.stun_urls.is_empty() {
            issues.push(
                "WARNING: ice.stun_urls is empty — ICE gathering will only discover host \
                 candidates, which fails behind most NATs."
                    .to_string(),
            );
        }
        if self.receiver.ice_gather_timeout_secs == 0 {
            issues.push(
                "WARNING: receiver.ice_gather_timeout_secs is 0 — every downstream offer will \
                 answer with zero gathered candidates."
                    .to_string(),
            );
        }

        let has_errors = issues.iter().any(|i| i.starts_with("ERROR:"));
        if has_errors { Err(issues) } else if issues.is_empty() { Ok(()) } else { Err(issues) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config: RelayConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.receiver.queue_capacity, 100);
        assert_eq!(config.receiver.ice_gather_timeout_secs, 3);
        assert_eq!(config.signaling.read_timeout_secs, 120);
        assert_eq!(config.signaling.write_timeout_secs, 10);
        assert_eq!(config.signaling.keepalive_interval_secs, 30);
        assert_eq!(config.ice.stun_urls.len(), 1);
    }

    #[test]
    fn validate_rejects_zero_port() {
        let mut config = RelayConfig {
            server: ServerConfig::default(),
            ice: IceConfig::default(),
            receiver: ReceiverConfig::default(),
            signaling: SignalingConfig::default(),
        };
        config.server.port = 0;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.starts_with("ERROR:")));
    }

    #[test]
    fn validate_accepts_defaults() {
        let config = RelayConfig {
            server: ServerConfig::default(),
            ice: IceConfig::default(),
            receiver: ReceiverConfig::default(),
            signaling: SignalingConfig::default(),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: RelayConfig = toml::from_str(
            r#"
            [server]
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.receiver.queue_capacity, 100);
    }
}
