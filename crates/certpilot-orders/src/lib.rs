//! Action orchestrator: sequences CSR handling, validation, vendor calls,
//! billing and task scheduling for each customer action.

pub mod billing;
pub mod errors;
pub mod models;
pub mod pricing;
pub mod service;
pub mod validator;
pub mod verify;

pub use errors::OrderError;
pub use models::{Actor, ChargeOutcome, SubmissionParams};
pub use service::OrderService;
pub use validator::{validate, ValidationReport};
pub use verify::{HttpVerifyClient, MockVerifyClient, VerifyClient, VerifyOutcome};
