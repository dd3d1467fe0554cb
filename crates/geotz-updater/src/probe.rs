//! Upstream release lookup.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{UpdateError, UpdateResult};
use crate::model::{ReleaseDocument, ReleaseInfo};
use crate::transport::Transport;

/// Resolves the latest release asset matching a name pattern.
pub struct ReleaseProbe<'a, T: ?Sized> {
    transport: &'a T,
}

impl<'a, T: Transport + ?Sized> ReleaseProbe<'a, T> {
    /// Probe through the given transport.
    #[must_use]
    pub const fn new(transport: &'a T) -> Self {
        Self { transport }
    }

    /// Fetch the release document at `endpoint` and select the asset matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Fetch`] when the endpoint is unreachable and
    /// [`UpdateError::Decode`] when the document is malformed.
    pub fn probe(&self, endpoint: &str, pattern: &str) -> UpdateResult<ReleaseInfo> {
        let body = self.transport.fetch_text(endpoint)?;
        let document: ReleaseDocument = serde_json::from_str(&body)
            .map_err(|source| UpdateError::decode("probe.decode", endpoint, source))?;
        let release = select_release(&document, pattern, Utc::now());
        match release.asset_name.as_deref() {
            Some(asset) => info!(
                asset,
                published_at = %release.published_at,
                "release asset matched"
            ),
            None => info!(
                pattern,
                assets = document.assets.len(),
                "no release asset matched pattern"
            ),
        }
        Ok(release)
    }
}

/// Select the first asset whose name contains `pattern`, in document order.
///
/// Falls back to [`ReleaseInfo::unavailable`] stamped at `probed_at`.
#[must_use]
pub fn select_release(
    document: &ReleaseDocument,
    pattern: &str,
    probed_at: DateTime<Utc>,
) -> ReleaseInfo {
    document
        .assets
        .iter()
        .find(|asset| asset.name.contains(pattern))
        .map_or_else(
            || ReleaseInfo::unavailable(probed_at),
            |asset| {
                debug!(asset = %asset.name, url = %asset.browser_download_url, "selected asset");
                ReleaseInfo {
                    download_url: Some(asset.browser_download_url.clone()),
                    asset_name: Some(asset.name.clone()),
                    published_at: asset.created_at,
                }
            },
        )
}
