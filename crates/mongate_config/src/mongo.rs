use serde::Deserialize;

// =======================================================
// MONGO (UPSTREAM) CONFIG + DEFAULTS
// =======================================================

/// The `[mongo]` section: where the real server lives and how to log in.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    /// host:port of the MongoDB server or replica-set member.
    pub addr: String,

    /// Optional credentials; when both are set, every new upstream
    /// connection authenticates against the `admin` database.
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:27017".into(),
            username: None,
            password: None,
        }
    }
}

/// Credentials handed to the authentication handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Database the user is defined on.
    pub source: String,
}

impl MongoConfig {
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Credentials with the `admin` source, when both halves are configured.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
                source: "admin".into(),
            }),
            _ => None,
        }
    }

    pub(crate) fn apply_defaults_from(&mut self, defaults: &MongoConfig) {
        if self.addr.is_empty() {
            self.addr = defaults.addr.clone();
        }
    }
}
