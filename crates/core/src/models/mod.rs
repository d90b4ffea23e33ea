pub mod activity;
pub mod credential;
pub mod event;
pub mod inventory;
pub mod job;
pub mod message;
pub mod organization;
pub mod project;
pub mod role;
pub mod schedule;
pub mod survey;
pub mod template;

pub use activity::{ActivityEntry, ActivityOperation};
pub use credential::{Credential, CredentialKind, SecretState, ASK, SECRET_FIELDS};
pub use event::{JobEvent, JobEventKind, JobHostSummary, HOST_COUNTER_KEYS};
pub use inventory::{
    ComputedFields, Group, GroupCounters, Host, HostState, Inventory, InventoryCounters,
    InventorySnapshot, InventorySource, InventorySourceKind, SourceState,
};
pub use job::{
    InventoryUpdateFields, JobDetails, JobFields, JobKind, JobStatus, LaunchType,
    ProjectUpdateFields, SystemJobFields, UnifiedJob,
};
pub use message::{queues, Message, MessageType};
pub use organization::{Organization, Team, User};
pub use project::{Project, ScmType};
pub use role::{
    ContentType, Permissions, Role, RoleAncestorEntry, SYSTEM_ADMINISTRATOR, SYSTEM_AUDITOR,
};
pub use schedule::Schedule;
pub use survey::{QuestionType, SurveyQuestion, SurveySpec};
pub use template::{
    JobTemplate, JobType, SystemJobTemplate, SystemJobType, TemplateKind, UnifiedTemplate,
};
