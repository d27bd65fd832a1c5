pub mod claims;
pub mod principal;
pub mod session;
pub mod user;

pub use claims::{CsrfClaims, PrincipalClaims, Registered, RegisteredClaims, TokenClaims, TokenUse};
pub use principal::Principal;
pub use session::{ClientPlatform, Session, PLATFORM_HEADER};
pub use user::{Membership, NewUser, Permission, PublicUser, Role, UserRecord};
