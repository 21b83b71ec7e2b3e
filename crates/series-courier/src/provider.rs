//! Episode listing and download over HTTP

use async_trait::async_trait;
use delivery_coordinator::{ContentProvider, GroupRef, ProviderError, ProviderItem};
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// HTTP client for the upstream content provider.
///
/// `GET {base}/groups/{group}/items` lists a group's items oldest first and
/// `GET {base}/groups/{group}/items/{item}/content` streams one item.
pub struct HttpContentProvider {
    client: Client,
    base_url: String,
}

impl HttpContentProvider {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn items_url(&self, group: &GroupRef) -> String {
        format!(
            "{}/groups/{}/items",
            self.base_url,
            urlencoding::encode(&group.0)
        )
    }

    fn content_url(&self, group: &GroupRef, item_id: &str) -> String {
        format!(
            "{}/groups/{}/items/{}/content",
            self.base_url,
            urlencoding::encode(&group.0),
            urlencoding::encode(item_id)
        )
    }
}

fn request_error(err: reqwest::Error) -> ProviderError {
    ProviderError::Request(err.to_string())
}

/// Item ids come from upstream; keep them from escaping the scratch dir
fn download_name(item_id: &str) -> String {
    item_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl ContentProvider for HttpContentProvider {
    async fn list_items(&self, group: &GroupRef) -> Result<Vec<ProviderItem>, ProviderError> {
        let url = self.items_url(group);
        debug!(url = %url, "Listing group items");

        let response = self.client.get(&url).send().await.map_err(request_error)?;
        if !response.status().is_success() {
            warn!(status = %response.status(), url = %url, "Failed to list group items");
            return Err(ProviderError::Request(format!(
                "provider returned status {}",
                response.status()
            )));
        }

        let items: Vec<ProviderItem> = response.json().await.map_err(request_error)?;
        debug!(group = %group, count = items.len(), "Listed group items");
        Ok(items)
    }

    async fn fetch_item(
        &self,
        group: &GroupRef,
        item_id: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, ProviderError> {
        let url = self.content_url(group, item_id);
        debug!(url = %url, "Fetching item from provider");

        let mut response = self.client.get(&url).send().await.map_err(request_error)?;
        if !response.status().is_success() {
            warn!(status = %response.status(), url = %url, "Failed to fetch item");
            return Err(ProviderError::Request(format!(
                "provider returned status {}",
                response.status()
            )));
        }

        let path = dest_dir.join(download_name(item_id));
        let mut file = fs::File::create(&path).await?;
        let mut size = 0usize;
        while let Some(chunk) = response.chunk().await.map_err(request_error)? {
            size += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(group = %group, item = item_id, size, "Fetched item");
        Ok(path)
    }
}
