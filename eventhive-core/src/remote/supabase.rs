//! HTTP adapter for a Supabase (PostgREST) ticket backend.

use super::{RemoteError, RemoteTicketStore, Result};
use crate::config::RemoteConfig;
use crate::database::{Attendee, Event};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// REST client for the EventHive Supabase project.
///
/// Scan inserts rely on a unique constraint over
/// `(qr_code, scanner_id, scanned_at)` in the scans table so that retried
/// pushes are ignored instead of duplicated.
pub struct SupabaseClient {
    client: reqwest::Client,
    rest_url: String,
    api_key: String,
    attendees_table: String,
    events_table: String,
    scans_table: String,
}

impl SupabaseClient {
    /// Create a new client. `timeout` bounds every request.
    pub fn new(config: &RemoteConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            rest_url: format!("{}/rest/v1", config.url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            attendees_table: config.attendees_table.clone(),
            events_table: config.events_table.clone(),
            scans_table: config.scans_table.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.rest_url, table)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let resp = self
            .authorized(builder)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_else(|_| "unknown".to_string());
            return Err(RemoteError::Status { status, body });
        }
        Ok(resp)
    }

    async fn get_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let resp = self.send(self.client.get(self.table_url(table)).query(query)).await?;
        resp.json()
            .await
            .map_err(|e| RemoteError::Decode(format!("{} rows: {}", table, e)))
    }
}

fn map_transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_decode() {
        RemoteError::Decode(e.to_string())
    } else {
        RemoteError::Unavailable(e.to_string())
    }
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl RemoteTicketStore for SupabaseClient {
    async fn fetch_attendees(&self, event_id: &str) -> Result<Vec<Attendee>> {
        let select = format!("*,event:{}(*)", self.events_table);
        self.get_rows(
            &self.attendees_table,
            &[("event_id", eq(event_id)), ("select", select)],
        )
        .await
    }

    async fn fetch_attendee_by_code(&self, code: &str) -> Result<Option<Attendee>> {
        let rows: Vec<Attendee> = self
            .get_rows(
                &self.attendees_table,
                &[
                    ("qr_code", eq(code)),
                    ("select", "*".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_event(&self, event_id: &str) -> Result<Option<Event>> {
        let rows: Vec<Event> = self
            .get_rows(
                &self.events_table,
                &[("id", eq(event_id)), ("limit", "1".to_string())],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn record_scan(&self, code: &str, scanner_id: &str, at: DateTime<Utc>) -> Result<()> {
        let body = serde_json::json!({
            "qr_code": code,
            "scanner_id": scanner_id,
            "scanned_at": rfc3339(at),
            "synced": true,
        });
        let request = self
            .client
            .post(self.table_url(&self.scans_table))
            .query(&[("on_conflict", "qr_code,scanner_id,scanned_at")])
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&body);

        self.send(request).await?;
        Ok(())
    }

    async fn set_checked_in(&self, code: &str, at: DateTime<Utc>) -> Result<()> {
        let at = rfc3339(at);
        let body = serde_json::json!({
            "checked_in": true,
            "checked_in_at": at,
            "updated_at": at,
        });
        // Only rows still unchecked are touched, so the first check-in time stands.
        let request = self
            .client
            .patch(self.table_url(&self.attendees_table))
            .query(&[("qr_code", eq(code)), ("checked_in", "eq.false".to_string())])
            .header("Prefer", "return=minimal")
            .json(&body);

        self.send(request).await?;
        Ok(())
    }
}
