//! Fatal-error reporter.
//!
//! Allocation failures and detected corruption pass through here before
//! they are returned. What happens next is the embedding engine's choice:
//! abort the process, hand the error back, or call a handler first.
//! Validation itself always runs regardless of the policy.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::error;

use crate::error::PoolError;

/// Callback invoked with every fatal error.
pub type FaultHandler = Arc<dyn Fn(&PoolError) + Send + Sync>;

/// What to do when a fatal error is detected.
#[derive(Clone, Default)]
pub enum FaultPolicy {
    /// Log the error and abort the process.
    Abort,
    /// Log the error and return it to the caller.
    #[default]
    Return,
    /// Log the error, invoke the handler, then return it to the caller.
    Handler(FaultHandler),
}

impl fmt::Debug for FaultPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => write!(f, "Abort"),
            Self::Return => write!(f, "Return"),
            Self::Handler(_) => write!(f, "Handler(..)"),
        }
    }
}

impl FromStr for FaultPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "return" => Ok(Self::Return),
            other => Err(format!("'{other}' is not one of: abort, return")),
        }
    }
}

/// Routes fatal errors according to a [`FaultPolicy`].
#[derive(Debug, Clone, Default)]
pub struct FaultReporter {
    policy: FaultPolicy,
    reported: u64,
}

impl FaultReporter {
    #[must_use]
    pub const fn new(policy: FaultPolicy) -> Self {
        Self {
            policy,
            reported: 0,
        }
    }

    /// The active policy.
    #[must_use]
    pub const fn policy(&self) -> &FaultPolicy {
        &self.policy
    }

    /// Number of fatal errors reported so far.
    #[must_use]
    pub const fn reported(&self) -> u64 {
        self.reported
    }

    /// Report a fatal error. Non-fatal errors are ignored.
    ///
    /// Does not return under [`FaultPolicy::Abort`].
    pub fn report(&mut self, fault: &PoolError) {
        if !fault.is_fatal() {
            return;
        }
        self.reported += 1;
        error!(code = fault.code(), error = %fault, "fatal pool error");
        match &self.policy {
            FaultPolicy::Abort => std::process::abort(),
            FaultPolicy::Return => {}
            FaultPolicy::Handler(handler) => handler(fault),
        }
    }
}
