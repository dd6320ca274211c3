pub mod service;

pub use service::Notifier;
