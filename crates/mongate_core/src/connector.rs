use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use mongate_config::Credentials;
use mongate_pool::Connector;
use tokio::net::TcpStream;
use tracing::debug;

use crate::collab::{AuthHandshake, NoAuth};

/// Dials the MongoDB server over TCP and, when credentials are configured,
/// runs the authentication handshake before the connection enters the pool.
pub struct MongoConnector {
    addr: String,
    credentials: Option<Credentials>,
    handshake: Arc<dyn AuthHandshake>,
}

impl MongoConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            credentials: None,
            handshake: Arc::new(NoAuth),
        }
    }

    pub fn with_auth(
        addr: impl Into<String>,
        credentials: Credentials,
        handshake: Arc<dyn AuthHandshake>,
    ) -> Self {
        Self {
            addr: addr.into(),
            credentials: Some(credentials),
            handshake,
        }
    }
}

#[async_trait]
impl Connector for MongoConnector {
    type Conn = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        if let Some(credentials) = &self.credentials {
            self.handshake.authenticate(&mut stream, credentials).await?;
            debug!(
                target: "mongate::pool",
                upstream = %self.addr,
                user = %credentials.username,
                source = %credentials.source,
                "Authenticated upstream connection"
            );
        }
        Ok(stream)
    }

    fn addr(&self) -> &str {
        &self.addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    struct RefusingHandshake {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl AuthHandshake for Arc<RefusingHandshake> {
        async fn authenticate(
            &self,
            _conn: &mut dyn ClientStream,
            _credentials: &Credentials,
        ) -> io::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "bad credentials"))
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            username: "ops".into(),
            password: "secret".into(),
            source: "admin".into(),
        }
    }

    #[tokio::test]
    async fn failed_handshake_fails_the_dial() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let handshake = Arc::new(RefusingHandshake {
            attempts: AtomicUsize::new(0),
        });
        let connector = MongoConnector::with_auth(addr, credentials(), Arc::new(handshake.clone()));

        let err = connector.connect().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(handshake.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connect_without_credentials_skips_the_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let connector = MongoConnector::new(addr.clone());
        assert_eq!(connector.addr(), addr);
        connector.connect().await.unwrap();
    }
}
