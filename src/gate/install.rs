//! Installation gate: until the console is installed, only the root path and
//! the install wizard are reachable.

use std::sync::atomic::{AtomicU8, Ordering};

use super::{Decision, GateRequest, Rejection};
use crate::auth::RequestIdentity;
use crate::response::ResponseCode;

const NOT_INSTALLED: u8 = 0;
const INSTALLING: u8 = 1;
const INSTALLED: u8 = 2;

/// Process-wide install state: not installed, installing, installed.
///
/// Only one caller at a time can hold the install claim, and once installed
/// the state never goes back.
#[derive(Debug, Default)]
pub struct InstallState {
    state: AtomicU8,
}

impl InstallState {
    pub fn new(installed: bool) -> Self {
        Self {
            state: AtomicU8::new(if installed { INSTALLED } else { NOT_INSTALLED }),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.state.load(Ordering::Acquire) == INSTALLED
    }

    /// Claim the install. Returns false if it is already installed or another
    /// install is running.
    pub fn begin(&self) -> bool {
        self.state
            .compare_exchange(NOT_INSTALLED, INSTALLING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Complete a claimed install.
    pub fn finish(&self) {
        let _ = self.state.compare_exchange(
            INSTALLING,
            INSTALLED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Give a claimed install back so it can be retried.
    pub fn abort(&self) {
        let _ = self.state.compare_exchange(
            INSTALLING,
            NOT_INSTALLED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

pub(super) fn check(req: &GateRequest<'_>, _identity: &mut RequestIdentity) -> Decision {
    if req.installed {
        return Decision::Continue;
    }
    if req.path.starts_with("/install") || req.path.trim_end_matches('/').is_empty() {
        // No users or secret exist yet, so nothing further can be checked.
        return Decision::Accept;
    }
    Decision::Reject(Rejection::new(
        ResponseCode::NotInstalled,
        "The console is not installed yet",
    ))
}
