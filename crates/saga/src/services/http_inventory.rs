//! Inventory gateway backed by a remote transits service.
//!
//! Contract: `GET ?day&destination&start` and `GET ?transitId` return arrays
//! of transits. `PUT ?transitId` merges the body fields into the stored
//! transit and answers 2xx, usually with an empty body.
//!
//! Seat updates are sent as that field merge with the resulting counters. The
//! keyed operation rides along in the query string ([`TransitWriteQuery`]); a
//! service that understands it answers with a [`SeatUpdateOutcome`], one that
//! does not simply stores the counters.

use std::time::Duration;

use async_trait::async_trait;
use common::TransitId;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::inventory::{
    InventoryError, InventoryGateway, SeatUpdate, SeatUpdateOutcome, Transit, TransitPatch,
    TransitQuery, TransitWriteQuery,
};
use crate::protocol::seat_transition;

/// HTTP client for the transits service.
#[derive(Debug, Clone)]
pub struct HttpInventoryGateway {
    client: Client,
    base_url: String,
}

impl HttpInventoryGateway {
    pub fn new(base_url: impl Into<String>) -> Result<Self, InventoryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(2))
            .build()
            .map_err(unavailable)?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn read_json<T: DeserializeOwned>(
        response: Response,
        transit_id: Option<&TransitId>,
    ) -> Result<T, InventoryError> {
        let response = check_status(response, transit_id)?;
        response.json().await.map_err(unavailable)
    }

    async fn put(
        &self,
        query: &TransitWriteQuery,
        patch: &TransitPatch,
    ) -> Result<Response, InventoryError> {
        let response = self
            .client
            .put(&self.base_url)
            .query(query)
            .json(patch)
            .send()
            .await
            .map_err(unavailable)?;
        check_status(response, Some(&query.transit_id))
    }
}

fn unavailable(err: reqwest::Error) -> InventoryError {
    InventoryError::Unavailable(err.to_string())
}

fn check_status(
    response: Response,
    transit_id: Option<&TransitId>,
) -> Result<Response, InventoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(match (status, transit_id) {
        (StatusCode::NOT_FOUND, Some(id)) => InventoryError::TransitNotFound(id.clone()),
        (StatusCode::CONFLICT, Some(id)) => InventoryError::Conflict {
            transit_id: id.clone(),
        },
        _ => InventoryError::Unavailable(format!("transits service responded {status}")),
    })
}

#[async_trait]
impl InventoryGateway for HttpInventoryGateway {
    async fn find_transits(&self, query: &TransitQuery) -> Result<Vec<Transit>, InventoryError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(query)
            .send()
            .await
            .map_err(unavailable)?;
        Self::read_json(response, None).await
    }

    async fn get_transit(&self, transit_id: &TransitId) -> Result<Option<Transit>, InventoryError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("transitId", transit_id.as_str())])
            .send()
            .await
            .map_err(unavailable)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let transits: Vec<Transit> = Self::read_json(response, Some(transit_id)).await?;
        Ok(transits.into_iter().next())
    }

    async fn update_seats(
        &self,
        transit_id: &TransitId,
        update: SeatUpdate,
    ) -> Result<SeatUpdateOutcome, InventoryError> {
        // A transition that fails locally may still be a redelivery the
        // service recognises, so the keyed query goes out with no counters.
        let next = seat_transition(update.operation.kind, update.expected, update.seats);
        let patch = match &next {
            Ok(counts) => TransitPatch::seats(*counts),
            Err(_) => TransitPatch::default(),
        };
        let query = TransitWriteQuery::seat_update(transit_id.clone(), &update);
        let response = self.put(&query, &patch).await?;

        let body = response.bytes().await.map_err(unavailable)?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return next.map(|_| SeatUpdateOutcome::Applied);
        }
        serde_json::from_slice(&body)
            .map_err(|err| InventoryError::Unavailable(format!("invalid seat update reply: {err}")))
    }

    async fn merge_transit(
        &self,
        transit_id: &TransitId,
        patch: TransitPatch,
    ) -> Result<(), InventoryError> {
        self.put(&TransitWriteQuery::merge(transit_id.clone()), &patch)
            .await?;
        Ok(())
    }
}
