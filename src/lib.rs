// Core modules
pub mod auth;
pub mod config;
pub mod gate;
pub mod response;
pub mod types;

// HTTP surface
pub mod api;
pub mod server;

// Re-export key types and functions
pub use api::login_log::{LoginLog, MemoryLoginLog};
pub use api::tasks::{MemoryTaskControl, TaskControl};
pub use api::{AppState, create_router};
pub use auth::{CredentialStore, Identity, MemoryCredentialStore, RequestIdentity, SignScheme};
pub use config::{ConfigPatch, ConfigSnapshot, ConfigStore, SigningConfig};
pub use gate::{ClientAddr, Gate, InstallState};
pub use response::{ApiError, JsonResponse, ResponseCode};
pub use server::{build_state, serve};
