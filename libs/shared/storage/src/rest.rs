use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::{
    Appointment, AppointmentStatus, AppointmentType, NewAppointment, Provider, ProviderSchedule,
    SchedulingError, WaitlistEntry,
};

use crate::store::SchedulingStore;

/// PostgREST-backed store. The database carries an exclusion constraint on
/// (provider id, time range) restricted to blocking statuses, so a
/// conditional insert either commits whole or comes back as HTTP 409.
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.storage_url.clone(),
            api_key: config.storage_api_key.clone(),
        }
    }

    fn headers(&self, returning: bool) -> Result<HeaderMap, SchedulingError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| SchedulingError::Storage(format!("invalid api key header: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);
        if returning {
            headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        }
        Ok(headers)
    }

    async fn request<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        returning: bool,
    ) -> Result<T, SchedulingError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("storage request {} {}", method, url);

        let mut req = self
            .client
            .request(method, &url)
            .headers(self.headers(returning)?);
        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req
            .send()
            .await
            .map_err(|e| SchedulingError::Storage(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("storage error ({}): {}", status, error_text);
            return Err(match status {
                StatusCode::CONFLICT => SchedulingError::Conflict(error_text),
                StatusCode::NOT_FOUND => SchedulingError::NotFound(error_text),
                _ => SchedulingError::Storage(format!("storage error ({status}): {error_text}")),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SchedulingError::Storage(format!("failed to parse response: {e}")))
    }

    async fn get_one<T>(&self, path: &str, what: &str) -> Result<T, SchedulingError>
    where
        T: DeserializeOwned,
    {
        let rows: Vec<T> = self.request(Method::GET, path, None, false).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| SchedulingError::NotFound(what.to_string()))
    }

    fn encode_ts(ts: DateTime<Utc>) -> String {
        urlencoding::encode(&ts.to_rfc3339()).into_owned()
    }
}

#[async_trait]
impl SchedulingStore for RestStore {
    async fn get_provider(&self, id: Uuid) -> Result<Provider, SchedulingError> {
        let path = format!("/rest/v1/providers?id=eq.{id}");
        self.get_one(&path, &format!("provider {id}")).await
    }

    async fn get_schedule(&self, provider_id: Uuid) -> Result<ProviderSchedule, SchedulingError> {
        let path = format!("/rest/v1/provider_schedules?provider_id=eq.{provider_id}");
        self.get_one(&path, &format!("schedule for provider {provider_id}"))
            .await
    }

    async fn get_appointment_type(&self, id: Uuid) -> Result<AppointmentType, SchedulingError> {
        let path = format!("/rest/v1/appointment_types?id=eq.{id}");
        self.get_one(&path, &format!("appointment type {id}")).await
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Appointment, SchedulingError> {
        let path = format!("/rest/v1/appointments?id=eq.{id}");
        self.get_one(&path, &format!("appointment {id}")).await
    }

    async fn blocking_appointments_in_range(
        &self,
        provider_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let path = format!(
            "/rest/v1/appointments?provider_ids=cs.%7B{}%7D&status=in.(tentative,booked,confirmed)&start_utc=lt.{}&end_utc=gt.{}&order=start_utc.asc",
            provider_id,
            Self::encode_ts(to),
            Self::encode_ts(from),
        );
        self.request(Method::GET, &path, None, false).await
    }

    async fn try_insert_appointment(
        &self,
        new: NewAppointment,
    ) -> Result<Appointment, SchedulingError> {
        let body = serde_json::to_value(&new)?;
        let rows: Vec<Appointment> = self
            .request(Method::POST, "/rest/v1/appointments", Some(body), true)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| SchedulingError::Storage("insert returned no row".to_string()))
    }

    async fn transition_status(
        &self,
        id: Uuid,
        expected: &[AppointmentStatus],
        next: AppointmentStatus,
    ) -> Result<Option<Appointment>, SchedulingError> {
        let expected_list = expected
            .iter()
            .map(|status| status.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let path = format!("/rest/v1/appointments?id=eq.{id}&status=in.({expected_list})");
        let body = serde_json::json!({
            "status": next,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let rows: Vec<Appointment> = self.request(Method::PATCH, &path, Some(body), true).await?;
        match rows.into_iter().next() {
            Some(appointment) => Ok(Some(appointment)),
            // The filter matched nothing: either the row moved on, or it
            // never existed. Disambiguate for the caller.
            None => {
                self.get_appointment(id).await?;
                Ok(None)
            }
        }
    }

    async fn best_waitlist_candidate(
        &self,
        freed_start: DateTime<Utc>,
        freed_end: DateTime<Utc>,
        type_id: Uuid,
    ) -> Result<Option<WaitlistEntry>, SchedulingError> {
        // Ordering is pushed to storage; the slot predicate is applied here
        // to keep the nullable-bound filters readable.
        let path = "/rest/v1/waitlist_entries?processed=eq.false&order=priority.desc,created_at.asc";
        let entries: Vec<WaitlistEntry> = self.request(Method::GET, path, None, false).await?;
        Ok(entries
            .into_iter()
            .find(|entry| entry.matches_slot(freed_start, freed_end, type_id)))
    }

    async fn get_waitlist_entry(&self, id: Uuid) -> Result<WaitlistEntry, SchedulingError> {
        let path = format!("/rest/v1/waitlist_entries?id=eq.{id}");
        self.get_one(&path, &format!("waitlist entry {id}")).await
    }

    async fn set_waitlist_processed(
        &self,
        id: Uuid,
        processed: bool,
    ) -> Result<(), SchedulingError> {
        let path = format!("/rest/v1/waitlist_entries?id=eq.{id}");
        let body = serde_json::json!({ "processed": processed });
        let rows: Vec<WaitlistEntry> = self.request(Method::PATCH, &path, Some(body), true).await?;
        if rows.is_empty() {
            return Err(SchedulingError::NotFound(format!("waitlist entry {id}")));
        }
        Ok(())
    }

    async fn latest_tentative_for_phone(
        &self,
        phone: &str,
    ) -> Result<Option<Appointment>, SchedulingError> {
        let path = format!(
            "/rest/v1/appointments?status=eq.tentative&contact-%3E%3Ephone=eq.{}&order=created_at.desc&limit=1",
            urlencoding::encode(phone),
        );
        let rows: Vec<Appointment> = self.request(Method::GET, &path, None, false).await?;
        Ok(rows.into_iter().next())
    }
}
