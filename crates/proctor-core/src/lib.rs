//! proctor-core: Proctored exam delivery and integrity-monitoring engine.
//!
//! This crate defines the data model, the collaborator ports, and the engine
//! components: question loading, sequencing, timers, violation escalation,
//! tamper detection, session persistence and durable result submission.
//! [`runner::AttemptRunner`] drives them for one attempt.

pub mod config;
pub mod emitter;
pub mod error;
pub mod integrity;
pub mod ledger;
pub mod loader;
pub mod model;
pub mod observer;
pub mod parser;
pub mod persistence;
pub mod runner;
pub mod sequencing;
pub mod session;
pub mod submission;
pub mod tamper;
pub mod timer;
pub mod traits;
