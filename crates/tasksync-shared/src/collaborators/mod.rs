//! # Collaborators
//!
//! Narrow capability interfaces the core consumes but does not implement:
//! credential acquisition, HTTP transport, delta token persistence and the
//! local resource store. Lightweight implementations are provided for local
//! development and tests.

pub mod auth;
pub mod file_token_store;
pub mod resource_store;
pub mod token_store;
pub mod transport;

pub use auth::{AuthProvider, StaticAuthProvider};
pub use file_token_store::FileTokenStore;
pub use resource_store::{InMemoryResourceStore, ResourceStore};
pub use token_store::{InMemoryTokenStore, TokenStore};
pub use transport::{
    HttpMethod, HttpTransport, Transport, TransportError, TransportRequest, TransportResponse,
};
