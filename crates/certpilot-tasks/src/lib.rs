//! Asynchronous task queue plus the scheduled validation poller.
//!
//! Tasks are persisted rows keyed by (subject, action); dispatch flows
//! through a tokio channel and workers coordinate only through the
//! database, so any number of worker processes can drain the same queue.

pub mod errors;
pub mod poller;
pub mod service;
pub mod worker;

pub use errors::TaskError;
pub use poller::{next_time_node, ValidationPoller, TIME_NODES};
pub use service::TaskService;
pub use worker::TaskWorker;
