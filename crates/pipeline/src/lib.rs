//! GRAD data collection services.
//!
//! Wires the pure `gdc-core` logic to storage, the message channel and the
//! external registries:
//!
//! - [`Reconciler`] ingests uploaded files and queues saga kick-offs on a
//!   bounded [`WorkerPool`].
//! - [`SagaOrchestrator`] drives the per-student validation saga.
//! - [`ValidationService`] answers validate requests with a rule pass.
//! - [`FilesetFinalizer`] promotes settled filesets and flags students.
//! - [`purge`] and [`sweeper`] hold the periodic background loops, and
//!   [`MessageRuntime`] routes channel topics to the services.

pub mod completion;
pub mod config;
pub mod context_loader;
pub mod error;
pub mod http_gateway;
pub mod locks;
pub mod memory;
pub mod orchestrator;
pub mod pool;
pub mod purge;
pub mod reconciler;
pub mod runtime;
pub mod sweeper;
pub mod validation_service;

pub use completion::FilesetFinalizer;
pub use config::PipelineConfig;
pub use context_loader::{CodeTableCache, ContextLoader};
pub use error::PipelineError;
pub use http_gateway::{GatewayConfig, HttpRegistryGateway};
pub use memory::{InMemoryGateway, InMemoryStore};
pub use orchestrator::{KickoffOutcome, ReplyOutcome, SagaOrchestrator, SweepReport};
pub use pool::WorkerPool;
pub use reconciler::{IngestReport, Reconciler, Upload};
pub use runtime::MessageRuntime;
pub use validation_service::ValidationService;
