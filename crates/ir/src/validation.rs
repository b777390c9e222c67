//! IR validation passes.
//!
//! These passes are not intended to provide diagnostics directly to
//! users. Instead, they assert invariants required for the codegen
//! analyses to be sound. They are used for testing and sanity checks
//! in the compiler.

use std::{fmt::Display, panic::Location};

pub mod cfg_integrity;
pub mod ssa;
pub mod uses;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0} (checked at {1})")]
pub struct ValidationError(pub String, pub &'static Location<'static>);

impl ValidationError {
    #[track_caller]
    pub fn new(msg: impl Display) -> Self {
        Self(msg.to_string(), Location::caller())
    }
}

/// Runs every validation pass over a function.
pub fn validate(func: &crate::Func) -> Result<(), ValidationError> {
    cfg_integrity::verify_cfg_integrity(func)?;
    ssa::verify_ssa(func)?;
    uses::verify_uses(func)?;
    Ok(())
}
