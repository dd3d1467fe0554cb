//! Network capability consumed by the probe and download stages.
//!
//! # Design
//! - The pipeline only needs "fetch text" and "fetch bytes to a path"; both are
//!   expressed as a trait so tests can substitute an in-memory transport.
//! - Non-success HTTP statuses are transport failures; nothing is retried.

use std::fs::{self, File};
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use tracing::{debug, warn};

use crate::error::{UpdateError, UpdateResult};

const USER_AGENT: &str = concat!("geotz-updater/", env!("CARGO_PKG_VERSION"));
const GITHUB_JSON: &str = "application/vnd.github+json";

/// Blocking network capability.
pub trait Transport {
    /// Fetch the body of `url` as text.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Fetch`] when the request fails or the response is not a success.
    fn fetch_text(&self, url: &str) -> UpdateResult<String>;

    /// Stream the body of `url` into `destination`, returning the byte count.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Fetch`] on transport failures and
    /// [`UpdateError::Filesystem`] when the destination cannot be written.
    fn fetch_to_path(&self, url: &str, destination: &Path) -> UpdateResult<u64>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn fetch_text(&self, url: &str) -> UpdateResult<String> {
        (**self).fetch_text(url)
    }

    fn fetch_to_path(&self, url: &str, destination: &Path) -> UpdateResult<u64> {
        (**self).fetch_to_path(url, destination)
    }
}

/// [`Transport`] backed by a blocking `reqwest` client.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build a transport with the given per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Fetch`] if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration) -> UpdateResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_JSON));

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(default_headers)
            .build()
            .map_err(|source| UpdateError::fetch("transport.build_client", "", source))?;
        Ok(Self { client })
    }

    /// Wrap an already configured client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn fetch_text(&self, url: &str) -> UpdateResult<String> {
        debug!(url, "fetching text body");
        self.client
            .get(url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .and_then(reqwest::blocking::Response::text)
            .map_err(|source| UpdateError::fetch("transport.fetch_text", url, source))
    }

    fn fetch_to_path(&self, url: &str, destination: &Path) -> UpdateResult<u64> {
        debug!(url, path = %destination.display(), "fetching payload");
        let mut response = self
            .client
            .get(url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|source| UpdateError::fetch("transport.fetch_payload", url, source))?;

        let mut output = File::create(destination).map_err(|source| {
            UpdateError::io("transport.create_destination", destination, source)
        })?;

        match response.copy_to(&mut output) {
            Ok(bytes) => Ok(bytes),
            Err(source) => {
                drop(output);
                if let Err(err) = fs::remove_file(destination) {
                    warn!(
                        error = %err,
                        path = %destination.display(),
                        "failed to remove partial download"
                    );
                }
                Err(UpdateError::fetch("transport.stream_payload", url, source))
            }
        }
    }
}
