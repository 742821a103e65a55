//! Object storage for builder-uploaded icons. The dispatch flow needs a
//! public URL the CI workflows can fetch, nothing more.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::Config;

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Persist `bytes` under `key` and return a publicly reachable URL.
    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> anyhow::Result<String>;
}

/// Writes objects under a local directory served at a public base URL.
#[derive(Debug, Clone)]
pub struct LocalStore {
    pub dir: PathBuf,
    pub public_base: String,
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put_object(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> anyhow::Result<String> {
        let path = self.dir.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        Ok(format!("{}/{}", self.public_base.trim_end_matches('/'), key))
    }
}

/// Returns URLs without persisting anything; for tests.
#[derive(Debug, Clone)]
pub struct MockStore {
    pub public_base: String,
}

#[async_trait]
impl ObjectStore for MockStore {
    async fn put_object(&self, key: &str, _bytes: Vec<u8>, _content_type: &str) -> anyhow::Result<String> {
        Ok(format!("{}/{}", self.public_base.trim_end_matches('/'), key))
    }
}

pub fn from_config(config: &Config) -> std::sync::Arc<dyn ObjectStore> {
    if config.storage_mode.eq_ignore_ascii_case("mock") {
        info!("storage.init_mock");
        return std::sync::Arc::new(MockStore { public_base: config.storage_public_base.clone() });
    }
    info!(dir = %config.storage_dir, "storage.init_local");
    std::sync::Arc::new(LocalStore {
        dir: PathBuf::from(&config.storage_dir),
        public_base: config.storage_public_base.clone(),
    })
}

/// Resolve the builder-provided icon into something the CI payload can carry.
///
/// http(s) URLs pass through unchanged; base64 data URLs are decoded and
/// uploaded; anything else, and any upload failure, degrades to `None` so a
/// broken icon never blocks a dispatch.
pub async fn resolve_icon(store: &dyn ObjectStore, app_id: uuid::Uuid, icon: &str) -> Option<String> {
    let icon = icon.trim();
    if icon.starts_with("http://") || icon.starts_with("https://") {
        return Some(icon.to_string());
    }
    let Some((content_type, data)) = parse_data_url(icon) else {
        warn!(%app_id, "icon is neither a URL nor a data URL, dropping");
        return None;
    };
    let ext = match content_type.as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        other => {
            warn!(%app_id, content_type = other, "unsupported icon content type, dropping");
            return None;
        }
    };
    let key = format!("icons/{app_id}.{ext}");
    match store.put_object(&key, data, &content_type).await {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(%app_id, error = %e, "icon upload failed, dispatching without icon");
            None
        }
    }
}

/// Split a `data:<type>;base64,<payload>` URL into content type and bytes.
pub fn parse_data_url(input: &str) -> Option<(String, Vec<u8>)> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    let rest = input.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let content_type = meta.strip_suffix(";base64")?.to_string();
    let data = STANDARD.decode(payload.trim()).ok()?;
    if content_type.is_empty() || data.is_empty() {
        return None;
    }
    Some((content_type, data))
}
