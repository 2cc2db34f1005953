pub mod chat;
pub mod conversation;
pub mod message;
pub mod user;

pub use chat::{BillingRates, ChatRequest, StreamFrame};
pub use conversation::{ConversationDoc, ConversationSummary};
pub use message::{MessageContent, Part, Role, StoredMessage};
pub use user::{AuthStatus, LoginRequest, RegisterRequest, User};
