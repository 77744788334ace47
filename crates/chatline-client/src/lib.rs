//! Realtime chat client: Socket.IO transport, typed session events, reactive
//! caches and the request/response repository built on top of them.

pub mod auth;
pub mod config;
pub mod error;
pub mod mapper;
pub mod parser;
pub mod protocol;
pub mod repository;
pub mod session;
pub mod share;
pub mod sync;
pub mod transport;

pub use auth::{AuthError, AuthService};
pub use config::TransportConfig;
pub use error::{RepositoryError, SessionError};
pub use repository::ChatRepository;
pub use session::{Credentials, Session};
