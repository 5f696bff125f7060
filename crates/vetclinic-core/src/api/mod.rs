//! REST API client for the clinic backend.
//!
//! Layers, from the wire up:
//! - `Transport`: sends one request (`HttpTransport` uses reqwest)
//! - `AuthPipeline`: attaches the bearer token and recovers from an expired
//!   access token with a single shared refresh and one retry
//! - `ApiClient`: JSON helpers plus login, verify and logout
//! - `ResourceClient`: CRUD for users, pets, appointments, consultations,
//!   clinical histories, inventory and billing

pub mod client;
pub mod error;
pub mod pipeline;
pub mod refresh;
pub mod request;
pub mod resources;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::ApiClient;
pub use error::ApiError;
pub use pipeline::{attach_credentials, AuthPipeline};
pub use refresh::{RefreshCoordinator, RefreshError, SingleFlight};
pub use request::{ApiRequest, ApiResponse, RequestKind};
pub use resources::{Resource, ResourceClient};
pub use transport::{HttpTransport, Transport};

pub use reqwest::Method;

pub const LOGIN_PATH: &str = "/auth/login/";
pub const REFRESH_PATH: &str = "/auth/refresh/";
pub const LOGOUT_PATH: &str = "/auth/logout/";
pub const VERIFY_PATH: &str = "/auth/verify/";
