//! Portal API client module.
//!
//! This module provides the `ApiClient` that every endpoint wrapper routes
//! through. It attaches the bearer token to outbound requests and the
//! anti-forgery token to mutating ones, captures rotated anti-forgery
//! tokens from responses, and converts authentication rejections into a
//! single latched invalidation.

pub mod client;

pub use client::{ApiClient, LoginGrant};
