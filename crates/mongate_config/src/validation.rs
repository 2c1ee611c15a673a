use std::net::SocketAddr;

use crate::ProxyConfig;

/// Validation output for a loaded Mongate configuration.
#[derive(Debug, Default)]
pub struct ConfigReport {
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl ConfigReport {
    /// Returns true when no errors were found.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns true when at least one error was found.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns the collected warning messages.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Returns the collected error messages.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Render warnings and errors into a readable, multi-line string.
    pub fn format(&self) -> String {
        let mut out = String::new();
        if !self.errors.is_empty() {
            out.push_str("Errors:\n");
            for err in &self.errors {
                out.push_str("  - ");
                out.push_str(err);
                out.push('\n');
            }
        }
        if !self.warnings.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("Warnings:\n");
            for warn in &self.warnings {
                out.push_str("  - ");
                out.push_str(warn);
                out.push('\n');
            }
        }
        out
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

/// Validate a Mongate configuration and return a report of issues.
pub fn validate(cfg: &ProxyConfig) -> ConfigReport {
    let mut report = ConfigReport::default();

    validate_listener(cfg, &mut report);
    validate_mongo(cfg, &mut report);
    validate_pool(cfg, &mut report);

    report
}

fn validate_listener(cfg: &ProxyConfig, report: &mut ConfigReport) {
    if cfg.proxy.listen.trim().is_empty() {
        report.error("proxy.listen is empty; the proxy needs a listen address");
    } else if cfg.proxy.listen.parse::<SocketAddr>().is_err() {
        report.warn(format!(
            "proxy.listen '{listen}' is not a socket address; DNS resolution will be used",
            listen = cfg.proxy.listen
        ));
    }

    if cfg.proxy.max_client_connections_per_ip == 0 {
        report.error("proxy.max_client_connections_per_ip must be greater than zero");
    }
}

fn validate_mongo(cfg: &ProxyConfig, report: &mut ConfigReport) {
    if cfg.mongo.addr.trim().is_empty() {
        report.error("mongo.addr is empty; the proxy needs an upstream address");
    }

    match (&cfg.mongo.username, &cfg.mongo.password) {
        (Some(_), None) => {
            report.error("mongo.username is set but mongo.password is missing");
        }
        (None, Some(_)) => {
            report.error("mongo.password is set but mongo.username is missing");
        }
        _ => {}
    }
}

fn validate_pool(cfg: &ProxyConfig, report: &mut ConfigReport) {
    if cfg.pool.max_connections == 0 {
        report.error("pool.max_connections must be greater than zero");
    }

    if cfg.pool.min_idle_connections > cfg.pool.max_connections {
        report.error(format!(
            "pool.min_idle_connections ({min}) exceeds pool.max_connections ({max})",
            min = cfg.pool.min_idle_connections,
            max = cfg.pool.max_connections
        ));
    }
}
