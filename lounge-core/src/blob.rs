/// Blob-store boundary. Attachment fields are opaque references resolved to
/// fetchable URLs at read time only.
pub trait BlobStore: Send + Sync {
    fn url_for(&self, reference: &str) -> String;
}

/// Store fronted by a public base URL (CDN or presign-free bucket).
pub struct PublicBlobStore {
    base_url: String,
}

impl PublicBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }
}

impl BlobStore for PublicBlobStore {
    fn url_for(&self, reference: &str) -> String {
        format!("{}/{}", self.base_url, reference.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_base_and_reference() {
        let blobs = PublicBlobStore::new("https://media.example/");
        assert_eq!(
            blobs.url_for("/chat/photo.jpg"),
            "https://media.example/chat/photo.jpg"
        );
    }
}
