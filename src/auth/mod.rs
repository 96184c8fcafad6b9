//! Authentication and authorization building blocks.
//!
//! - **Session tokens**: HS256 JWTs in the `Auth-Token` header, see [`token`]
//! - **Path policy**: exact-match allow-lists per role tier, see [`policy`]
//! - **Signed requests**: `time`/`sign` query parameters on `/v1`, see
//!   [`signature`]
//! - **Credentials**: the [`CredentialStore`] seam used at login
//!
//! None of these touch the request directly; the gate in [`crate::gate`]
//! wires them into the ordered middleware chain.

mod context;
mod credentials;
pub mod policy;
pub mod signature;
pub mod token;

pub use context::{AuthenticatedUser, Identity, RequestIdentity};
pub use credentials::{BoxFuture, CredentialStore, MemoryCredentialStore, NewUser};
pub use policy::{PathDecision, authorize, normalize_path};
pub use signature::{SignScheme, SignatureError, SignatureOutcome, SignedParams};
pub use token::{Claims, TokenError};
