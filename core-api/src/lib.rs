//! # API Access Module
//!
//! Authenticated, resilient access to the backend REST API.
//!
//! ## Overview
//!
//! This module provides:
//! - Error taxonomy for failed calls (`ApiError`, `ErrorKind`)
//! - Jittered exponential backoff and retry eligibility
//! - Ordered request/response/error interceptor chains
//! - Timeout- and cancellation-bounded fetch
//! - Two-tier GET response cache with TTLs and prefix invalidation
//! - `ApiClient`, the orchestrator tying auth, retry and caching together
//! - Typed endpoint services (`AuthApi`, `UserApi`, `ResourceApi`)

pub mod backoff;
pub mod cache;
pub mod client;
pub mod error;
pub mod fetch;
pub mod interceptor;
pub mod services;

pub use backoff::RetryPolicy;
pub use cache::{CacheEntry, CacheMode, CacheTtl, ResponseCache};
pub use client::{ApiClient, ApiClientBuilder, RequestOptions};
pub use error::{ApiError, CacheError, ErrorKind, Result};
pub use fetch::ResilientFetch;
pub use interceptor::{
    ErrorInterceptor, InterceptorPipeline, RequestDescriptor, RequestInterceptor,
    ResponseEnvelope, ResponseInterceptor,
};
pub use services::{AuthApi, ResourceApi, ResourceKind, UserApi};
