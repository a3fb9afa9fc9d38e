#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};
use gdc_core::fileset::{FileType, IngestTarget, ReportingPeriod};
use gdc_core::gateway::RegistryStudent;
use gdc_core::retry::RetryPolicy;
use gdc_core::student::{fields, FieldMap};
use gdc_core::types::{new_id, DbId, Timestamp};
use gdc_events::EventBus;
use gdc_pipeline::{
    ContextLoader, FilesetFinalizer, InMemoryGateway, InMemoryStore, MessageRuntime, Reconciler, SagaOrchestrator,
    Upload, ValidationService, WorkerPool,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const MINCODE: &str = "03939001";

/// Retry policy that keeps failure tests fast.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        multiplier: 1.0,
        max_delay: Duration::from_millis(1),
    }
}

/// 2024/25 school year plus summer.
pub fn period() -> ReportingPeriod {
    ReportingPeriod {
        id: new_id(),
        school_year_start: NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
        school_year_end: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
        summer_start: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
        summer_end: NaiveDate::from_ymd_opt(2025, 9, 30).unwrap(),
    }
}

pub fn uploaded_at() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 11, 5, 9, 30, 0).unwrap()
}

pub fn registry_student(pen: &str) -> RegistryStudent {
    RegistryStudent {
        student_id: new_id(),
        pen: pen.into(),
        legal_surname: "SMITH".into(),
        legal_given_name: Some("JANE".into()),
        legal_middle_names: None,
        birthdate: NaiveDate::from_ymd_opt(2007, 3, 1).unwrap(),
        local_id: None,
        status_code: "A".into(),
        mincode: Some(MINCODE.into()),
    }
}

fn record(file_type: FileType, pen: &str, extra: &[(&str, &str)]) -> FieldMap {
    let mut map = FieldMap::new();
    map.insert(fields::TRANSACTION_CODE.into(), file_type.transaction_code().into());
    map.insert(fields::MINCODE.into(), MINCODE.into());
    map.insert(fields::PEN.into(), pen.into());
    for (k, v) in extra {
        map.insert(k.to_string(), v.to_string());
    }
    map
}

pub fn dem(pen: &str) -> FieldMap {
    record(
        FileType::Demographic,
        pen,
        &[
            (fields::LEGAL_SURNAME, "SMITH"),
            (fields::LEGAL_GIVEN_NAME, "JANE"),
            (fields::BIRTHDATE, "20070301"),
        ],
    )
}

pub fn crs(pen: &str, code: &str, level: &str) -> FieldMap {
    record(
        FileType::Course,
        pen,
        &[
            (fields::LEGAL_SURNAME, "SMITH"),
            (fields::COURSE_CODE, code),
            (fields::COURSE_LEVEL, level),
            (fields::COURSE_YEAR, "2024"),
            (fields::COURSE_MONTH, "06"),
        ],
    )
}

pub fn xam(pen: &str, code: &str, level: &str) -> FieldMap {
    record(
        FileType::Assessment,
        pen,
        &[
            (fields::LEGAL_SURNAME, "SMITH"),
            (fields::COURSE_CODE, code),
            (fields::COURSE_LEVEL, level),
            (fields::COURSE_YEAR, "2024"),
            (fields::COURSE_MONTH, "06"),
        ],
    )
}

/// The whole pipeline wired over the in-memory store, the in-process bus
/// and a fake registry.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub gateway: Arc<InMemoryGateway>,
    pub bus: Arc<EventBus>,
    pub orchestrator: Arc<SagaOrchestrator>,
    pub reconciler: Reconciler,
    pub pool: Arc<WorkerPool>,
    pub target: IngestTarget,
    cancel: CancellationToken,
    runtime: JoinHandle<()>,
}

impl Harness {
    pub fn start(gateway: InMemoryGateway) -> Self {
        let store = Arc::new(InMemoryStore::new());
        store.add_reporting_period(period());
        let gateway = Arc::new(gateway);
        let bus = Arc::new(EventBus::default());

        let finalizer = Arc::new(FilesetFinalizer::new(store.clone()));
        let orchestrator = Arc::new(SagaOrchestrator::new(
            store.clone(),
            bus.clone(),
            fast_retry(),
            finalizer,
        ));
        let loader = ContextLoader::new(gateway.clone(), store.clone(), fast_retry(), Duration::from_secs(60));
        let validation = Arc::new(ValidationService::new(store.clone(), loader, bus.clone(), fast_retry()));
        let runtime = MessageRuntime::new(orchestrator.clone(), validation);

        let cancel = CancellationToken::new();
        let receiver = bus.subscribe();
        let runtime = {
            let cancel = cancel.clone();
            tokio::spawn(async move { runtime.run(receiver, cancel).await })
        };

        let pool = Arc::new(WorkerPool::new(4, 64));
        let reconciler = Reconciler::new(store.clone(), orchestrator.clone(), pool.clone());

        Self {
            store,
            gateway,
            bus,
            orchestrator,
            reconciler,
            pool,
            target: IngestTarget::School {
                school_id: new_id(),
                mincode: MINCODE.into(),
            },
            cancel,
            runtime,
        }
    }

    pub fn upload(&self, file_name: &str, records: Vec<FieldMap>) -> Upload {
        Upload {
            file_name: file_name.into(),
            records,
            target: self.target.clone(),
            uploaded_at: uploaded_at(),
        }
    }

    pub async fn shutdown(self) {
        self.pool.shutdown().await;
        self.cancel.cancel();
        let _ = self.runtime.await;
    }
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

pub fn ids(ids: impl IntoIterator<Item = DbId>) -> Vec<DbId> {
    let mut v: Vec<DbId> = ids.into_iter().collect();
    v.sort();
    v
}
