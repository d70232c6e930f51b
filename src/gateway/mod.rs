mod auth_middleware;
pub mod client;
pub mod session;
pub mod token_store;

pub use client::{ApiGateway, ApiRequest};
pub use session::{AuthState, CredentialSession, SessionManager};
pub use token_store::{FileTokenStore, MemoryTokenStore, StoredTokens, TokenStore};
