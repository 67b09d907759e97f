pub mod role;
pub mod session;
pub mod user;

pub use role::{PermissionGrant, Role, UpsertRoleRequest};
pub use session::{Session, SessionInfo};
pub use user::{
    ExternalIdentityRef, LoginRequest, RegisterRequest, RegisterResponse, TokenResponse, User,
    UserResponse,
};
