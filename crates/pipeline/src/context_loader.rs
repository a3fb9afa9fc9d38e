//! Assemble the [`RunContext`] a rule pass needs.
//!
//! Every registry call goes through the saga retry policy; once the
//! context is loaded, rule evaluation itself is synchronous and never
//! retried.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gdc_core::gateway::{CodeTables, ExternalDataGateway, GatewayError};
use gdc_core::retry::{with_retry, RetryError, RetryPolicy};
use gdc_core::saga::ValidationPayload;
use gdc_core::store::Store;
use gdc_core::student::AnyStudent;
use gdc_core::validation::RunContext;
use tokio::sync::RwLock;

use crate::error::PipelineError;

/// Code tables shared by every rule pass, refreshed after `ttl`.
pub struct CodeTableCache {
    ttl: Duration,
    cached: RwLock<Option<(Instant, Arc<CodeTables>)>>,
}

impl CodeTableCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: RwLock::new(None),
        }
    }

    pub async fn get(
        &self,
        gateway: &dyn ExternalDataGateway,
        retry: &RetryPolicy,
    ) -> Result<Arc<CodeTables>, RetryError<GatewayError>> {
        if let Some((fetched_at, codes)) = self.cached.read().await.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(Arc::clone(codes));
            }
        }

        let mut cached = self.cached.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some((fetched_at, codes)) = cached.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(Arc::clone(codes));
            }
        }
        let codes = with_retry(retry, "code_tables", GatewayError::is_transient, || gateway.code_tables())
            .await?
            .value;
        let codes = Arc::new(codes);
        *cached = Some((Instant::now(), Arc::clone(&codes)));
        tracing::debug!("Registry code tables refreshed");
        Ok(codes)
    }

    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }
}

pub struct ContextLoader {
    gateway: Arc<dyn ExternalDataGateway>,
    store: Arc<dyn Store>,
    codes: CodeTableCache,
    retry: RetryPolicy,
}

impl ContextLoader {
    pub fn new(
        gateway: Arc<dyn ExternalDataGateway>,
        store: Arc<dyn Store>,
        retry: RetryPolicy,
        code_table_ttl: Duration,
    ) -> Self {
        Self {
            gateway,
            store,
            codes: CodeTableCache::new(code_table_ttl),
            retry,
        }
    }

    pub fn codes(&self) -> &CodeTableCache {
        &self.codes
    }

    async fn lookup<T, F, Fut>(&self, label: &'static str, op: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        Ok(with_retry(&self.retry, label, GatewayError::is_transient, op).await?.value)
    }

    /// Registry student, GRAD record, course history, catalogue entries and
    /// (for CRS/XAM records) the fileset's DEM record for the same PEN.
    pub async fn load(&self, payload: &ValidationPayload) -> Result<RunContext, PipelineError> {
        let gateway = self.gateway.as_ref();
        let codes = self.codes.get(gateway, &self.retry).await?;

        let mut ctx = RunContext::new(payload.upload_date, codes);
        if let Some(mincode) = &payload.mincode {
            ctx = ctx.with_mincode(mincode.clone());
        }

        let student = &payload.student;
        let header = student.header();
        let pen = header.pen.as_deref().map(str::trim).filter(|p| !p.is_empty());

        if let Some(pen) = pen {
            let registry = self.lookup("student_by_pen", || gateway.student_by_pen(pen)).await?;
            if let Some(found) = &registry {
                let student_id = found.student_id;
                let grad = self
                    .lookup("grad_student_record", || gateway.grad_student_record(student_id))
                    .await?;
                let history = self
                    .lookup("student_course_history", || gateway.student_course_history(student_id))
                    .await?;
                ctx = ctx.with_grad_record(grad).with_course_history(history);
            }
            ctx = ctx.with_registry_student(registry);
        }

        let mut catalogue: Vec<(&str, Option<&str>)> = Vec::new();
        match student {
            AnyStudent::Demographic(_) => {}
            AnyStudent::Course(crs) => {
                if let Some(code) = crs.course_code.as_deref() {
                    catalogue.push((code, crs.course_level.as_deref()));
                }
                if let Some(code) = crs.related_course.as_deref() {
                    catalogue.push((code, crs.related_level.as_deref()));
                }
            }
            AnyStudent::Assessment(xam) => {
                if let Some(code) = xam.course_code.as_deref() {
                    catalogue.push((code, xam.course_level.as_deref()));
                }
            }
        }
        for (code, level) in catalogue {
            if code.trim().is_empty() {
                continue;
            }
            if let Some(course) = self.lookup("course", || gateway.course(code, level)).await? {
                ctx.insert_course(course);
            }
        }

        if let (Some(pen), AnyStudent::Course(_) | AnyStudent::Assessment(_)) = (pen, student) {
            let demographic = self.store.find_demographic_by_pen(header.fileset_id, pen).await?;
            ctx = ctx.with_demographic(demographic);
        }

        Ok(ctx)
    }
}
