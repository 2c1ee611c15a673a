use std::sync::Arc;

use mongate_config::ProxyConfig;
use mongate_core::Proxy;
use mongate_stats::LogStats;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::init_tracing();

    let cfg = ProxyConfig::from_file_or_default("mongate.conf");
    cfg.print();

    if cfg.mongo().credentials().is_some() {
        warn!(
            target: "mongate",
            "mongo credentials configured; the built-in handshake is a placeholder \
             until a real AuthHandshake implementation is wired in"
        );
    }

    let proxy = Proxy::new(cfg, Arc::new(LogStats));
    proxy.start().await?;

    tokio::signal::ctrl_c().await?;
    info!(
        target: "mongate",
        "Ctrl-C received; draining sessions (press again to force)"
    );

    tokio::select! {
        res = proxy.stop(false) => res?,
        _ = tokio::signal::ctrl_c() => {
            warn!(target: "mongate", "Forcing hard shutdown");
            proxy.stop(true).await?;
        }
    }

    Ok(())
}
