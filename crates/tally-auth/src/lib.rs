//! # tally-auth
//!
//! OAuth2 token lifecycle for Tally.
//!
//! Provides the per-grant [`TokenStore`], the [`TokenManager`] that performs
//! single-flight `refresh_token` exchanges, JWT expiry decoding for token
//! responses without `expires_in`, and the [`RefreshState`] file that carries
//! rotated refresh tokens from one run to the next.

pub mod error;
pub mod manager;
pub mod state;
pub mod store;
pub mod token;

pub use error::AuthError;
pub use manager::{ClientCredentials, TokenManager};
pub use state::RefreshState;
pub use store::{Grant, TokenStore};
pub use token::{AccessToken, Token};
