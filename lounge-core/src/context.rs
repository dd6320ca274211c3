use std::sync::Arc;

use crate::blob::BlobStore;
use crate::config::Config;
use crate::store::Store;

/// Shared handles passed to every component. Collaborators are constructed
/// once at process start and injected; nothing here is a process-wide global.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub blobs: Arc<dyn BlobStore>,
}

impl AppContext {
    pub fn new(config: Config, store: Arc<dyn Store>, blobs: Arc<dyn BlobStore>) -> Self {
        AppContext {
            config: Arc::new(config),
            store,
            blobs,
        }
    }
}
