pub mod service;
pub mod views;

pub use service::{ChatService, SendTarget};
pub use views::{
    ConversationView, MessageSearchHit, MessageView, ParticipantView, ReplyPreview, SearchResults,
};
