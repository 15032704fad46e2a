//! Run orchestration: job descriptors, content hashing, the unit loop and
//! completion notification.

mod error;
mod hashing;
mod job;
mod notify;
mod orchestrator;
mod upload;

pub use error::{WorkflowError, WorkflowResult};
pub use hashing::{content_hash, normalize};
pub use job::{JobDescriptor, ParameterSet, WorkUnit};
pub use notify::{
    notifier_from_config, CompletionEvent, LogNotifier, Notifier, NotifyError, NotifyResult,
    WebhookNotifier,
};
pub use orchestrator::{RunReport, WorkflowOrchestrator};
pub use upload::{upload_contacts, UploadJob, UploadReport};
