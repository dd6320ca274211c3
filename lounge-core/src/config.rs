use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub delivery: DeliveryConfig,
    pub webhook: WebhookConfig,
    pub blob: BlobConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub api_port: u16,
    pub jwt_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub fcm_server_key: Option<String>,
    pub push_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub shared_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    pub public_base_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                api_port: env::var("API_PORT")
                    .or_else(|_| env::var("PORT"))
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .unwrap_or(8080),
                jwt_secret: env::var("JWT_SECRET")
                    .unwrap_or_else(|_| "your-secret-key-change-in-production".to_string()),
            },
            delivery: DeliveryConfig {
                fcm_server_key: env::var("FCM_SERVER_KEY").ok(),
                push_timeout_secs: env::var("PUSH_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            webhook: WebhookConfig {
                shared_secret: env::var("WEBHOOK_SHARED_SECRET")
                    .unwrap_or_else(|_| "change-me".to_string()),
            },
            blob: BlobConfig {
                public_base_url: env::var("BLOB_PUBLIC_BASE_URL")
                    .unwrap_or_else(|_| "https://media.lounge.example".to_string()),
            },
        }
    }
}
