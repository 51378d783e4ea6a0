//! Typed wrappers over the backend endpoints.

mod auth;
mod resources;
mod user;

pub use auth::{
    AuthApi, AuthResponse, AuthSession, ChangePasswordRequest, LoginRequest, RegisterRequest,
    ResetPasswordRequest, UserProfile, VerifyMfaRequest,
};
pub use resources::{ResourceApi, ResourceKind};
pub use user::{UserApi, UserPreferences};
