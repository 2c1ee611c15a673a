//! Proxy core: accept loop, per-client serve loop, per-IP admission, and the
//! message-forwarding step that preserves the mutation → `getLastError`
//! sticky window on one upstream connection.

use tokio::io::{AsyncRead, AsyncWrite};

mod admission;
mod collab;
mod connector;
mod forward;
mod last_error;
mod server;
mod session;

pub use admission::ClientAdmission;
pub use collab::{AuthHandshake, NoAuth, PassthroughQuery, QueryProxy};
pub use connector::MongoConnector;
pub use forward::{ForwardError, proxy_message};
pub use last_error::LastErrorWindow;
pub use server::Proxy;

/// Any duplex byte stream a session can serve: plain TCP, the diagnostic
/// tee wrapper, or an in-memory stream in tests.
pub trait ClientStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ClientStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}
