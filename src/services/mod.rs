pub mod assistant;
pub mod conversation;
pub mod database;
pub mod executor;
pub mod gate;
pub mod keyring;
pub mod settings;

pub use assistant::{Assistant, TurnOutcome};
pub use conversation::ConversationStore;
pub use database::Database;
pub use executor::{AuditSink, ExecutionReport, MutationExecutor};
pub use gate::ConfirmationGate;
pub use keyring::CredentialStore;
pub use settings::{AppSettings, SettingsService};
