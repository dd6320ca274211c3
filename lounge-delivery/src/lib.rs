pub mod fcm;
pub mod push;

pub use fcm::FcmDelivery;
pub use push::{PushMessage, PushOptions, PushPriority, PushProvider};
