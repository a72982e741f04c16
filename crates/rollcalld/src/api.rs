//! Client for the operator/attendance REST API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use rollcall_core::Operator;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid URL {0}: {1}")]
    InvalidUrl(String, String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },
}

/// Attendance entry as stored by the attendance service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub operator_id: String,
    /// Calendar date, `YYYY-MM-DD`.
    pub date: String,
    /// RFC 3339 timestamp of the accepted match.
    pub timestamp: String,
}

/// Source of operator records and their reference photos.
#[async_trait]
pub trait OperatorDirectory: Send + Sync {
    async fn list_operators(&self) -> Result<Vec<Operator>, ApiError>;
    async fn fetch_photo(&self, photo: &str) -> Result<Vec<u8>, ApiError>;
}

/// Append-only attendance store.
#[async_trait]
pub trait AttendanceRecorder: Send + Sync {
    async fn record(&self, record: &AttendanceRecord) -> Result<AttendanceRecord, ApiError>;

    /// Records for one calendar date (`YYYY-MM-DD`).
    async fn list_attendance(&self, date: &str) -> Result<Vec<AttendanceRecord>, ApiError>;
}

/// HTTP implementation of both API seams, scoped to one production line.
pub struct RestClient {
    client: Client,
    base: Url,
    line: String,
    token: Option<String>,
}

impl RestClient {
    pub fn new(
        base_url: &str,
        line: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        // Trailing slash so relative joins append instead of replacing the last segment.
        let base = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| ApiError::InvalidUrl(base_url.to_string(), e.to_string()))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base,
            line: line.to_string(),
            token,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidUrl(path.to_string(), e.to_string()))
    }

    /// Photos are either absolute URLs or paths relative to the API base.
    fn photo_url(&self, photo: &str) -> Result<Url, ApiError> {
        match Url::parse(photo) {
            Ok(url) => Ok(url),
            Err(_) => self.endpoint(photo),
        }
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        url: &Url,
    ) -> Result<reqwest::Response, ApiError> {
        let response = self.authorized(req).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl OperatorDirectory for RestClient {
    /// `GET /operators/{line}`.
    async fn list_operators(&self) -> Result<Vec<Operator>, ApiError> {
        let url = self.endpoint(&format!("operators/{}", self.line))?;
        let response = self.send(self.client.get(url.clone()), &url).await?;
        let operators: Vec<Operator> = response.json().await?;
        tracing::debug!(count = operators.len(), line = %self.line, "fetched operators");
        Ok(operators)
    }

    async fn fetch_photo(&self, photo: &str) -> Result<Vec<u8>, ApiError> {
        let url = self.photo_url(photo)?;
        let response = self.send(self.client.get(url.clone()), &url).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl AttendanceRecorder for RestClient {
    /// `POST /attendance/{line}`.
    async fn record(&self, record: &AttendanceRecord) -> Result<AttendanceRecord, ApiError> {
        let url = self.endpoint(&format!("attendance/{}", self.line))?;
        let response = self
            .send(self.client.post(url.clone()).json(record), &url)
            .await?;
        Ok(response.json().await?)
    }

    /// `GET /attendance/{line}/{date}`.
    async fn list_attendance(&self, date: &str) -> Result<Vec<AttendanceRecord>, ApiError> {
        let url = self.endpoint(&format!("attendance/{}/{}", self.line, date))?;
        let response = self.send(self.client.get(url.clone()), &url).await?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> RestClient {
        RestClient::new(base, "line-1", None, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let c = client("http://host:3000/api");
        assert_eq!(
            c.endpoint("operators/line-1").unwrap().as_str(),
            "http://host:3000/api/operators/line-1"
        );
        let c = client("http://host:3000/api/");
        assert_eq!(
            c.endpoint("/attendance/line-1").unwrap().as_str(),
            "http://host:3000/api/attendance/line-1"
        );
    }

    #[test]
    fn test_photo_url_absolute_and_relative() {
        let c = client("http://host/api");
        assert_eq!(
            c.photo_url("https://cdn.example.com/a.jpg").unwrap().as_str(),
            "https://cdn.example.com/a.jpg"
        );
        assert_eq!(
            c.photo_url("/uploads/7.jpg").unwrap().as_str(),
            "http://host/api/uploads/7.jpg"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            RestClient::new("not a url", "l", None, Duration::from_secs(1)),
            Err(ApiError::InvalidUrl(..))
        ));
    }

    #[test]
    fn test_record_json_shape() {
        let record = AttendanceRecord {
            operator_id: "A".into(),
            date: "2026-10-19".into(),
            timestamp: "2026-10-19T08:00:00+00:00".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["operatorId"], "A");
        assert_eq!(json["date"], "2026-10-19");
    }
}
