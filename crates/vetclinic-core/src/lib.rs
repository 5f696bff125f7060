//! Vetclinic core - client library for the veterinary clinic REST API.
//!
//! This crate holds everything a front end needs to talk to the clinic
//! backend: the persisted `SessionStore`, the authenticated request pipeline
//! with single-flight token refresh, the typed `ApiClient` and the resource
//! clients built on it, and configuration loading.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, Resource, ResourceClient};
pub use auth::{AuthStatus, SessionStore};
pub use config::{Config, Settings};
pub use models::{Page, Role, User};
