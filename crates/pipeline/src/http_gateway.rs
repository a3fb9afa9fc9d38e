//! HTTP client for the student, GRAD, course and code-table registries.
//!
//! 404 means "not on file" and maps to `None` (or an empty list). Timeouts,
//! connection failures, 429 and 5xx are transient and left to the saga
//! retry policy; any other status or an undecodable body is rejected.

use std::time::Duration;

use async_trait::async_trait;
use gdc_core::gateway::{
    CodeTables, CourseRecord, ExternalDataGateway, GatewayError, GradStudentRecord, RegistryStudent,
    StudentCourseRecord,
};
use gdc_core::types::DbId;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::error::PipelineError;

/// Default timeout for a single registry request.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub student_api_url: String,
    pub grad_api_url: String,
    pub course_api_url: String,
    pub codes_api_url: String,
    pub timeout: Duration,
}

impl GatewayConfig {
    /// Load registry endpoints from environment variables.
    ///
    /// | Env Var                | Default    |
    /// |------------------------|------------|
    /// | `STUDENT_API_URL`      | (required) |
    /// | `GRAD_API_URL`         | (required) |
    /// | `COURSE_API_URL`       | (required) |
    /// | `CODES_API_URL`        | (required) |
    /// | `GATEWAY_TIMEOUT_SECS` | `10`       |
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PipelineError> {
        let required = |name: &str| {
            lookup(name)
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| PipelineError::Config(format!("{name} must be set")))
        };
        let timeout_secs = match lookup("GATEWAY_TIMEOUT_SECS") {
            Some(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse()
                .map_err(|_| PipelineError::Config(format!("GATEWAY_TIMEOUT_SECS has invalid value '{raw}'")))?,
            _ => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            student_api_url: required("STUDENT_API_URL")?,
            grad_api_url: required("GRAD_API_URL")?,
            course_api_url: required("COURSE_API_URL")?,
            codes_api_url: required("CODES_API_URL")?,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

pub struct HttpRegistryGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpRegistryGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build registry HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: String,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, GatewayError> {
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(format!("{url}: {e}")))?;

        if !check_status(response.status(), &url)? {
            return Ok(None);
        }
        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| GatewayError::Rejected(format!("{url}: {e}")))
    }
}

/// `Ok(true)` for a usable body, `Ok(false)` for not-found.
fn check_status(status: StatusCode, url: &str) -> Result<bool, GatewayError> {
    if status.is_success() {
        Ok(true)
    } else if status == StatusCode::NOT_FOUND {
        Ok(false)
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(GatewayError::Transient(format!("{url} returned HTTP {}", status.as_u16())))
    } else {
        Err(GatewayError::Rejected(format!("{url} returned HTTP {}", status.as_u16())))
    }
}

#[async_trait]
impl ExternalDataGateway for HttpRegistryGateway {
    async fn student_by_pen(&self, pen: &str) -> Result<Option<RegistryStudent>, GatewayError> {
        let url = format!("{}/students", self.config.student_api_url);
        self.get_json(url, &[("pen", pen)]).await
    }

    async fn grad_student_record(&self, student_id: DbId) -> Result<Option<GradStudentRecord>, GatewayError> {
        let url = format!("{}/students/{student_id}", self.config.grad_api_url);
        self.get_json(url, &[]).await
    }

    async fn student_course_history(&self, student_id: DbId) -> Result<Vec<StudentCourseRecord>, GatewayError> {
        let url = format!("{}/students/{student_id}/courses", self.config.grad_api_url);
        Ok(self.get_json(url, &[]).await?.unwrap_or_default())
    }

    async fn course(
        &self,
        course_code: &str,
        course_level: Option<&str>,
    ) -> Result<Option<CourseRecord>, GatewayError> {
        let url = format!("{}/courses", self.config.course_api_url);
        let mut query = vec![("code", course_code.trim())];
        if let Some(level) = course_level.map(str::trim).filter(|l| !l.is_empty()) {
            query.push(("level", level));
        }
        self.get_json(url, &query).await
    }

    async fn code_tables(&self) -> Result<CodeTables, GatewayError> {
        let url = format!("{}/code-tables", self.config.codes_api_url);
        self.get_json(url.clone(), &[])
            .await?
            .ok_or_else(|| GatewayError::Rejected(format!("{url} returned no code tables")))
    }
}
