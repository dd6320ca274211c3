pub mod blob;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod store;
pub mod types;

pub use blob::{BlobStore, PublicBlobStore};
pub use config::Config;
pub use context::AppContext;
pub use error::Error;
pub use event::DomainEvent;
pub use store::memory::MemoryStore;
pub use store::{ConversationFilter, Store, StoreError};
pub use types::{
    Attachment, Conversation, MediaKind, Message, NewMessage, NewUser, Notification, Report,
    ReportItemType, ReportStatus, Role, Tier, User,
};
