//! proctor-transport: adapters for the collaborators of the exam engine.
//!
//! Implements the `proctor-core` ports over HTTP (exam config, exam status,
//! violation intake, result submission, connectivity), over local files
//! (question banks, results, violation log, durable key/value store), and
//! as a scriptable in-process mock for tests.

pub mod config;
pub mod http;
pub mod local;
pub mod mock;
pub mod store;

pub use config::{load_config, load_config_from, ConfigError, EngineSettings, ProctorConfig};
pub use http::HttpBackend;
pub use local::{FileExamSource, FileResultSink, LogViolationSink};
pub use mock::MockBackend;
pub use store::FileStore;
