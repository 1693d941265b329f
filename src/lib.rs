pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;

use crate::config::AppConfig;
use crate::infra::{cache::RedisCache, db::Db, storage::ObjectStorage};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub cache: RedisCache,
    pub storage: ObjectStorage,
    pub admin_token: Option<String>,
    pub paseto_access_key: [u8; 32],
    pub paseto_refresh_key: [u8; 32],
    pub access_ttl_minutes: u64,
    pub refresh_ttl_days: u64,
    pub attachment_max_bytes: usize,
    pub attachment_max_files: usize,
    pub download_url_ttl_seconds: u64,
}

impl AppState {
    pub fn new(config: &AppConfig, db: Db, cache: RedisCache, storage: ObjectStorage) -> Self {
        Self {
            db,
            cache,
            storage,
            admin_token: config.admin_token.clone(),
            paseto_access_key: config.paseto_access_key,
            paseto_refresh_key: config.paseto_refresh_key,
            access_ttl_minutes: config.access_ttl_minutes,
            refresh_ttl_days: config.refresh_ttl_days,
            attachment_max_bytes: config.attachment_max_bytes,
            attachment_max_files: config.attachment_max_files,
            download_url_ttl_seconds: config.download_url_ttl_seconds,
        }
    }
}
