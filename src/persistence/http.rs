//! Remote ride backend over HTTP.
//!
//! Rides are written with `PUT {base_url}/rides/{ride_id}`. The ride id is
//! generated on the client, so the request is an upsert and a retried save
//! cannot create a second record.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{PersistenceError, RidePersistence, RideRecord};
use crate::recording::types::{RideId, RideSnapshot};
use crate::sensors::types::CoordinateSample;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings for the ride backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Bearer token of the signed-in user
    pub access_token: Option<String>,
    /// Owner recorded on each ride
    pub user_id: Option<uuid::Uuid>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            access_token: None,
            user_id: None,
        }
    }
}

/// Request body for storing a ride.
#[derive(Debug, Serialize)]
struct RidePayload<'a> {
    #[serde(flatten)]
    record: RideRecord,
    coordinates: &'a [CoordinateSample],
}

/// Response body; the backend echoes the stored id.
#[derive(Debug, Deserialize)]
struct SaveRideResponse {
    id: RideId,
}

/// Ride persistence against a remote HTTP API.
pub struct HttpRideBackend {
    http: reqwest::Client,
    config: BackendConfig,
}

impl HttpRideBackend {
    pub fn new(config: BackendConfig) -> Result<Self, PersistenceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PersistenceError::Network(e.to_string()))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn ride_url(&self, ride_id: &RideId) -> String {
        format!("{}/rides/{}", self.config.base_url.trim_end_matches('/'), ride_id)
    }

    async fn put_ride(&self, snapshot: &RideSnapshot) -> Result<RideId, PersistenceError> {
        let (token, user_id) = match (&self.config.access_token, self.config.user_id) {
            (Some(token), Some(user_id)) if !token.is_empty() => (token, user_id),
            _ => return Err(PersistenceError::NotAuthenticated),
        };

        let payload = RidePayload {
            record: RideRecord::from_snapshot(snapshot, user_id),
            coordinates: &snapshot.coordinates,
        };

        let response = self
            .http
            .put(self.ride_url(&snapshot.ride_id))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PersistenceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        // Tolerate an empty body; the id is ours either way.
        let id = match response.json::<SaveRideResponse>().await {
            Ok(body) => body.id,
            Err(_) => snapshot.ride_id,
        };

        tracing::info!("Ride {} stored on backend", id);
        Ok(id)
    }
}

/// Map a non-success HTTP status to a persistence error.
pub(crate) fn classify_status(status: StatusCode) -> PersistenceError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PersistenceError::NotAuthenticated,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            PersistenceError::Network(format!("Backend returned status {}", status))
        }
        _ => PersistenceError::Backend(format!("Backend returned status {}", status)),
    }
}

impl RidePersistence for HttpRideBackend {
    fn save_ride<'a>(
        &'a self,
        snapshot: &'a RideSnapshot,
    ) -> BoxFuture<'a, Result<RideId, PersistenceError>> {
        Box::pin(self.put_ride(snapshot))
    }
}
