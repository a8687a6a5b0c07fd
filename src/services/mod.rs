pub mod authn;
pub mod client_id;
pub mod config_trust;
pub mod context;
pub mod email;
pub mod one_time;
pub mod rate_limit;
pub mod roles;
pub mod social;
pub mod tokens;
pub mod two_factor;

pub use authn::{Authenticator, LoginOutcome};
pub use client_id::{create_client_id, normalize_domain, user_key, verify_client_id};
pub use config_trust::ConfigVerifier;
pub use context::{AuthContext, ACCESS_TOKEN_HEADER};
pub use email::{Mailer, MemoryMailer, SmtpMailer};
pub use one_time::{FlowAck, OneTimeTokenService, REQUEST_ACK};
pub use rate_limit::FixedWindowLimiter;
pub use roles::DomainRoleService;
pub use social::{GoogleProvider, IdentityProvider, SocialProfile};
pub use tokens::{
    select_redirect_url, AccessTokenClaims, NoOrgContext, OrgContext, OrgContextSource,
    TokenExchange, TokenService,
};
pub use two_factor::TwoFactorService;
