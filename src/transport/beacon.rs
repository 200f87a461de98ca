//! Fire-and-forget delivery used on the unload path.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use futures::future::join_all;
use reqwest::{Client, header::CONTENT_TYPE};
use tokio::{runtime::Handle, task::JoinHandle, time::timeout};
use tracing::debug;

use crate::config::SyncConfig;

use super::{Beacon, CredentialStore, TransportError, TransportResult};

/// Beacon that posts JSON bodies from detached tasks.
///
/// Sends are never awaited by the caller. [`HttpBeacon::drain`] lets a shutting-down process give
/// the in-flight tasks a bounded grace period.
#[derive(Clone)]
pub struct HttpBeacon {
    client: Client,
    credentials: Arc<dyn CredentialStore>,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl HttpBeacon {
    /// Beacon sharing the configured request timeout.
    pub fn new(config: &SyncConfig, credentials: Arc<dyn CredentialStore>) -> TransportResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| TransportError::ClientBuilder { source })?;
        Ok(Self {
            client,
            credentials,
            in_flight: Arc::default(),
        })
    }

    /// Wait for queued deliveries for at most `grace`. Returns how many finished in time.
    pub async fn drain(&self, grace: Duration) -> usize {
        let handles: Vec<_> = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let total = handles.len();
        match timeout(grace, join_all(handles)).await {
            Ok(_) => total,
            Err(_) => {
                debug!(pending = total, "beacon grace period elapsed");
                0
            }
        }
    }
}

impl Beacon for HttpBeacon {
    fn send(&self, url: &str, body: String) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            return false;
        };

        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(token) = self.credentials.access_token() {
            request = request.bearer_auth(token);
        }

        let url = url.to_string();
        let handle = runtime.spawn(async move {
            match request.send().await {
                Ok(response) => debug!(url = %url, status = %response.status(), "beacon delivered"),
                Err(err) => debug!(url = %url, error = %err, "beacon delivery failed"),
            }
        });

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.retain(|task| !task.is_finished());
        in_flight.push(handle);
        true
    }
}
