//! Prayer request lifecycle: intake, triage and reply.

pub mod intake;
pub mod reply;
pub mod triage;

pub use intake::submit;
pub use reply::{ReconcileReport, reconcile, reply};
pub use triage::triage;
