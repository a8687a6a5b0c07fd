pub mod authorization_code;
pub mod client_config;
pub mod domain_role;
pub mod user;
pub mod verification_token;

pub use authorization_code::AuthorizationCode;
pub use client_config::{AuthMethod, ClientConfig, OrgFeatures, RegistrationMode, RegistrationPolicy, UserScope};
pub use domain_role::{DomainRole, RoleKind};
pub use user::User;
pub use verification_token::{TokenKind, VerificationToken};
