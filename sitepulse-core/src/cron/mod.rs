//! Background jobs driven by an external scheduler
//!
//! Each job is an independently invocable, idempotent, short-lived run:
//! - [`doctor`]: concurrent probe battery persisted as one snapshot
//! - [`project_sync`]: repository metadata sync with per-item isolation
//! - [`link_check`]: friend-link liveness and back-link verification

pub mod doctor;
pub mod link_check;
pub mod project_sync;
