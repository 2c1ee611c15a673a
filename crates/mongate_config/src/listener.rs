use serde::Deserialize;

// =======================================================
// LISTENER CONFIG + DEFAULTS
// =======================================================

/// The `[proxy]` section: the client-facing listener and the timeouts that
/// shape one client session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Address the proxy listens on for MongoDB clients.
    pub listen: String,

    /// Maximum concurrent client connections admitted per source IP.
    pub max_client_connections_per_ip: usize,

    // Timeouts (seconds)
    pub client_idle_timeout_secs: u64,
    pub message_timeout_secs: u64,
    pub get_last_error_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:27111".into(),
            max_client_connections_per_ip: 64,
            client_idle_timeout_secs: 3600,
            message_timeout_secs: 120,
            get_last_error_timeout_secs: 60,
        }
    }
}

impl ListenerConfig {
    pub fn listen(&self) -> &str {
        &self.listen
    }

    pub fn max_client_connections_per_ip(&self) -> usize {
        self.max_client_connections_per_ip
    }

    pub fn client_idle_timeout_secs(&self) -> u64 {
        self.client_idle_timeout_secs
    }

    pub fn message_timeout_secs(&self) -> u64 {
        self.message_timeout_secs
    }

    pub fn get_last_error_timeout_secs(&self) -> u64 {
        self.get_last_error_timeout_secs
    }

    pub(crate) fn apply_defaults_from(&mut self, defaults: &ListenerConfig) {
        if self.listen.is_empty() {
            self.listen = defaults.listen.clone();
        }
        if self.client_idle_timeout_secs == 0 {
            self.client_idle_timeout_secs = defaults.client_idle_timeout_secs;
        }
        if self.message_timeout_secs == 0 {
            self.message_timeout_secs = defaults.message_timeout_secs;
        }
        if self.get_last_error_timeout_secs == 0 {
            self.get_last_error_timeout_secs = defaults.get_last_error_timeout_secs;
        }
    }
}
