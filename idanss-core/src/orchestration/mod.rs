//! Scan life-cycle coordination: who is active, where requests go, and how
//! backend reports reach the progress store.

pub mod collector;
pub mod config;
pub mod deadline;
pub mod dispatcher;
pub mod lanes;
pub mod registry;
pub mod reporter;
pub mod runtime;
