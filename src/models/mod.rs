pub mod audit;
pub mod conversation;
pub mod invoice;
pub mod message;
pub mod proposal;
pub mod provider;

pub use audit::{ActionAuditEntry, ActionType, Outcome};
pub use conversation::{Conversation, ConversationSummary};
pub use invoice::{format_cents, Invoice, InvoiceStatus};
pub use message::{Message, MessageMetadata, NewMessage, Role};
pub use proposal::{PendingProposal, ProposalChange, ProposedAction, RequestedChange};
pub use provider::ProviderId;
