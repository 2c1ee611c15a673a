use serde::Deserialize;

use crate::validation::{ConfigReport, validate};
use crate::{GlobalConfig, ListenerConfig, MongoConfig, PoolSection};

// =======================================================
// MONGATE CONFIG — main config
// =======================================================
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub global: GlobalConfig,

    #[serde(default)]
    pub proxy: ListenerConfig,

    #[serde(default)]
    pub mongo: MongoConfig,

    #[serde(default)]
    pub pool: PoolSection,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        let mut cfg = Self {
            global: GlobalConfig::default(),
            proxy: ListenerConfig::default(),
            mongo: MongoConfig::default(),
            pool: PoolSection::default(),
        };
        cfg.apply_defaults();
        cfg
    }
}

impl ProxyConfig {
    pub fn global(&self) -> &GlobalConfig {
        &self.global
    }

    pub fn proxy(&self) -> &ListenerConfig {
        &self.proxy
    }

    pub fn mongo(&self) -> &MongoConfig {
        &self.mongo
    }

    pub fn pool(&self) -> &PoolSection {
        &self.pool
    }

    /// Validate the configuration and return a report of warnings and errors.
    pub fn validate(&self) -> ConfigReport {
        validate(self)
    }

    pub fn from_file(file_name: &str) -> Result<Self, config::ConfigError> {
        let built = config::Config::builder()
            .add_source(config::File::new(file_name, config::FileFormat::Ini).required(false))
            .build()?;

        let mut cfg: ProxyConfig = built.try_deserialize()?;

        cfg.apply_defaults();
        Ok(cfg)
    }

    pub fn from_file_or_default(file_name: &str) -> Self {
        match Self::from_file(file_name) {
            Ok(cfg) => {
                let report = cfg.validate();
                if report.has_errors() {
                    eprintln!("⚠️  Invalid config in '{file_name}':");
                    eprintln!("{}", report.format());
                    eprintln!("➡️  Using default config (in-memory)...");
                    ProxyConfig::default()
                } else {
                    if !report.warnings().is_empty() {
                        eprintln!("⚠️  Config warnings in '{file_name}':");
                        eprintln!("{}", report.format());
                    }
                    cfg
                }
            }
            Err(e) => {
                eprintln!("⚠️  Error reading config '{file_name}': {e}");
                eprintln!("➡️  Using default config (in-memory)...");
                ProxyConfig::default()
            }
        }
    }

    fn apply_defaults(&mut self) {
        let def_global = GlobalConfig::default();
        self.global.apply_defaults_from(&def_global);

        let def_proxy = ListenerConfig::default();
        self.proxy.apply_defaults_from(&def_proxy);

        let def_mongo = MongoConfig::default();
        self.mongo.apply_defaults_from(&def_mongo);

        let def_pool = PoolSection::default();
        self.pool.apply_defaults_from(&def_pool);
    }

    pub fn print(&self) {
        println!("=============== MONGATE CONFIG ===============");
        println!("\n[global]");
        println!("  log_level                    = {}", self.global.log_level);
        println!("\n[proxy]");
        println!("  listen                       = {}", self.proxy.listen);
        println!(
            "  max_client_connections_per_ip = {}",
            self.proxy.max_client_connections_per_ip
        );
        println!(
            "  client_idle_timeout_secs     = {}",
            self.proxy.client_idle_timeout_secs
        );
        println!(
            "  message_timeout_secs         = {}",
            self.proxy.message_timeout_secs
        );
        println!(
            "  get_last_error_timeout_secs  = {}",
            self.proxy.get_last_error_timeout_secs
        );
        println!("\n[mongo]");
        println!("  addr                         = {}", self.mongo.addr);
        println!(
            "  auth                         = {}",
            if self.mongo.credentials().is_some() {
                "enabled (admin)"
            } else {
                "disabled"
            }
        );
        println!("\n[pool]");
        println!("  max_connections              = {}", self.pool.max_connections);
        println!(
            "  min_idle_connections         = {}",
            self.pool.min_idle_connections
        );
        println!(
            "  idle_timeout_secs            = {}",
            self.pool.idle_timeout_secs
        );
        println!("  close_pool_size              = {}", self.pool.close_pool_size);
        println!("==============================================");
    }
}
