pub mod browser;
pub mod config;
pub mod connector;
pub mod error;
pub mod selectors;
pub mod store;
pub mod testing;
pub mod workflow;

pub use config::{
    load_agent_config, load_document, AgentConfig, ArtifactsSection, BrowserSection,
    ConnectorSection, ConnectorsSection, NotificationsSection, RetrySection, StorageSection,
    TimeoutSection,
};
pub use error::{ConfigError, Result};
pub use store::{
    AgentError, AgentRun, CheckIn, MemoryRunStore, RunMetrics, RunStatus, RunStore,
    SqliteRunStore, SqliteRunStoreBuilder, StoreError,
};
pub use workflow::{
    JobDescriptor, RunReport, UploadJob, WorkflowError, WorkflowOrchestrator, WorkflowResult,
};
