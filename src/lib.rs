//! Authentication and authorization core.
//!
//! Verifies identity, issues and validates credentials, enforces password
//! and MFA policy, manages sessions, and decides access through role-based
//! permissions. Transport, persistence engines, and identity-provider wire
//! protocols stay outside: callers embed [`services::AuthService`] and hand
//! it the store and repository implementations of their choice.

pub mod config;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AuthConfig;
pub use services::{AuthError, AuthService};
