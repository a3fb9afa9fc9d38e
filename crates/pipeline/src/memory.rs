//! In-memory store and registry gateway.
//!
//! [`InMemoryStore`] keeps the same guarantees as the PostgreSQL store:
//! file replacement and fileset completion are atomic, at most one active
//! saga exists per student, and log steps are unique per saga. It backs the integration tests and
//! local runs without a database.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use gdc_core::fileset::{FileType, Fileset, FilesetKey, FilesetStatus, ReportingPeriod};
use gdc_core::finalize::ErrorStudentFlag;
use gdc_core::gateway::{
    CodeTables, CourseRecord, ExternalDataGateway, GatewayError, GradStudentRecord, RegistryStudent,
    StudentCourseRecord,
};
use gdc_core::reconcile::{self, FilesetChange, ParsedUpload};
use gdc_core::saga::{EventOutcome, Saga, SagaEventState, SagaState, SagaStatus, ValidationResult, VALIDATION_SAGA};
use gdc_core::store::{ErrorStudentStore, FilesetStore, SagaStore, StoreError, StudentStore};
use gdc_core::student::{AnyStudent, DemographicStudent};
use gdc_core::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct State {
    periods: Vec<ReportingPeriod>,
    filesets: HashMap<DbId, Fileset>,
    /// Keyed by id; ids are time-ordered so iteration is insertion order.
    students: BTreeMap<DbId, AnyStudent>,
    sagas: HashMap<DbId, Saga>,
    event_states: HashMap<DbId, Vec<SagaEventState>>,
    flags: BTreeMap<(DbId, String), ErrorStudentFlag>,
}

impl State {
    fn current(&self, key: &FilesetKey, status: FilesetStatus) -> Option<&Fileset> {
        self.filesets.values().find(|f| f.key == *key && f.status == status)
    }

    fn remove_fileset(&mut self, id: DbId) {
        self.filesets.remove(&id);
        self.students.retain(|_, s| s.header().fileset_id != id);
        let sagas: Vec<DbId> = self
            .sagas
            .values()
            .filter(|s| s.fileset_id == id)
            .map(|s| s.id)
            .collect();
        for saga_id in sagas {
            self.sagas.remove(&saga_id);
            self.event_states.remove(&saga_id);
        }
        self.flags.retain(|(fileset_id, _), _| *fileset_id != id);
    }

    /// Status save guarded on the copy's `updated_at`.
    fn save_status(&mut self, fileset: &Fileset) -> bool {
        match self.filesets.get_mut(&fileset.id) {
            Some(stored)
                if stored.status != FilesetStatus::Superseded && stored.updated_at == fileset.updated_at =>
            {
                stored.status = fileset.status;
                for file_type in FileType::ALL {
                    stored.slot_mut(file_type).status = fileset.slot(file_type).status;
                }
                stored.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    fn settled(&self, student_id: DbId) -> bool {
        self.sagas
            .values()
            .any(|s| s.student_id == student_id && s.saga_name == VALIDATION_SAGA && s.status.is_terminal())
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_reporting_period(&self, period: ReportingPeriod) {
        let mut state = self.state();
        state.periods.retain(|p| p.id != period.id);
        state.periods.push(period);
    }

    /// Every saga, oldest first.
    pub fn sagas(&self) -> Vec<Saga> {
        let mut sagas: Vec<Saga> = self.state().sagas.values().cloned().collect();
        sagas.sort_by_key(|s| s.created_at);
        sagas
    }
}

#[async_trait]
impl FilesetStore for InMemoryStore {
    async fn active_reporting_period(&self, on: NaiveDate) -> Result<Option<ReportingPeriod>, StoreError> {
        let state = self.state();
        Ok(ReportingPeriod::active_for(&state.periods, on).cloned())
    }

    async fn replace_file(&self, key: FilesetKey, upload: ParsedUpload) -> Result<FilesetChange, StoreError> {
        let mut state = self.state();
        let loaded = state.current(&key, FilesetStatus::Loaded).cloned();
        let completed = state.current(&key, FilesetStatus::Completed).cloned();

        let change = reconcile::apply(key, loaded, completed.as_ref(), upload, Utc::now());

        if let Some(old) = change.superseded {
            if let Some(fileset) = state.filesets.get_mut(&old) {
                fileset.status = FilesetStatus::Superseded;
                fileset.updated_at = Utc::now();
            }
        }
        let fileset_id = change.fileset.id;
        state.filesets.insert(fileset_id, change.fileset.clone());
        state
            .students
            .retain(|_, s| !(s.header().fileset_id == fileset_id && s.file_type() == change.file_type));
        state.flags.retain(|(id, _), _| *id != fileset_id);
        for student in &change.students {
            state.students.insert(student.id(), student.clone());
        }
        Ok(change)
    }

    async fn find_fileset(&self, id: DbId) -> Result<Option<Fileset>, StoreError> {
        Ok(self.state().filesets.get(&id).cloned())
    }

    async fn list_filesets_by_status(&self, status: FilesetStatus) -> Result<Vec<Fileset>, StoreError> {
        let mut filesets: Vec<Fileset> = self
            .state()
            .filesets
            .values()
            .filter(|f| f.status == status)
            .cloned()
            .collect();
        filesets.sort_by_key(|f| f.updated_at);
        Ok(filesets)
    }

    async fn save_fileset_status(&self, fileset: &Fileset) -> Result<bool, StoreError> {
        Ok(self.state().save_status(fileset))
    }

    async fn complete_fileset(&self, fileset: &Fileset, flags: &[ErrorStudentFlag]) -> Result<bool, StoreError> {
        let mut state = self.state();
        if !state.save_status(fileset) {
            return Ok(false);
        }
        state.flags.retain(|(id, _), _| *id != fileset.id);
        for flag in flags {
            state
                .flags
                .entry((flag.fileset_id, flag.pen.clone()))
                .or_insert_with(|| flag.clone());
        }
        Ok(true)
    }

    async fn purge_stale_filesets(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let mut state = self.state();
        let stale: Vec<DbId> = state
            .filesets
            .values()
            .filter(|f| matches!(f.status, FilesetStatus::Loaded | FilesetStatus::Superseded))
            .filter(|f| f.updated_at < cutoff)
            .map(|f| f.id)
            .collect();
        for id in &stale {
            state.remove_fileset(*id);
        }
        Ok(stale.len() as u64)
    }
}

#[async_trait]
impl StudentStore for InMemoryStore {
    async fn find_student(&self, id: DbId) -> Result<Option<AnyStudent>, StoreError> {
        Ok(self.state().students.get(&id).cloned())
    }

    async fn list_students(
        &self,
        fileset_id: DbId,
        file_type: Option<FileType>,
    ) -> Result<Vec<AnyStudent>, StoreError> {
        Ok(self
            .state()
            .students
            .values()
            .filter(|s| s.header().fileset_id == fileset_id)
            .filter(|s| file_type.map_or(true, |t| s.file_type() == t))
            .cloned()
            .collect())
    }

    async fn find_demographic_by_pen(
        &self,
        fileset_id: DbId,
        pen: &str,
    ) -> Result<Option<DemographicStudent>, StoreError> {
        Ok(self.state().students.values().find_map(|s| match s {
            AnyStudent::Demographic(dem)
                if dem.header.fileset_id == fileset_id && dem.header.pen.as_deref() == Some(pen) =>
            {
                Some(dem.clone())
            }
            _ => None,
        }))
    }

    async fn unsettled_students(&self, fileset_id: DbId, file_type: FileType) -> Result<u64, StoreError> {
        let state = self.state();
        Ok(state
            .students
            .values()
            .filter(|s| s.header().fileset_id == fileset_id && s.file_type() == file_type)
            .filter(|s| !state.settled(s.id()))
            .count() as u64)
    }
}

#[async_trait]
impl SagaStore for InMemoryStore {
    async fn saga_exists(&self, student_id: DbId, saga_name: &str) -> Result<bool, StoreError> {
        Ok(self
            .state()
            .sagas
            .values()
            .any(|s| s.student_id == student_id && s.saga_name == saga_name))
    }

    async fn create_saga(&self, saga: &Saga, entry: &SagaEventState) -> Result<bool, StoreError> {
        let mut state = self.state();
        let active = state.sagas.values().any(|s| {
            s.student_id == saga.student_id && s.saga_name == saga.saga_name && !s.status.is_terminal()
        });
        if active || state.sagas.contains_key(&saga.id) {
            return Ok(false);
        }
        state.sagas.insert(saga.id, saga.clone());
        state.event_states.insert(saga.id, vec![entry.clone()]);
        Ok(true)
    }

    async fn find_saga(&self, id: DbId) -> Result<Option<Saga>, StoreError> {
        Ok(self.state().sagas.get(&id).cloned())
    }

    async fn update_saga(&self, saga: &Saga) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state.sagas.get_mut(&saga.id) {
            Some(stored) if stored.step == saga.step => {
                *stored = saga.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_transition(
        &self,
        saga: &Saga,
        entries: &[SagaEventState],
        result: Option<&ValidationResult>,
    ) -> Result<bool, StoreError> {
        let Some(first) = entries.first() else {
            return Ok(false);
        };
        let mut state = self.state();
        let expected_step = first.step_number - 1;
        match state.sagas.get(&saga.id) {
            Some(stored) if stored.step == expected_step => {}
            _ => return Ok(false),
        }
        let log = state.event_states.entry(saga.id).or_default();
        if entries
            .iter()
            .any(|e| log.iter().any(|l| l.step_number == e.step_number))
        {
            return Ok(false);
        }
        log.extend(entries.iter().cloned());
        state.sagas.insert(saga.id, saga.clone());

        if let Some(result) = result {
            if let Some(student) = state.students.get_mut(&result.student_id) {
                let header = student.header_mut();
                header.status = result.status;
                header.issues = result.issues.clone();
            }
        }
        Ok(true)
    }

    async fn event_states(&self, saga_id: DbId) -> Result<Vec<SagaEventState>, StoreError> {
        Ok(self.state().event_states.get(&saga_id).cloned().unwrap_or_default())
    }

    async fn event_state_exists(
        &self,
        saga_id: DbId,
        event_type: SagaState,
        outcome: EventOutcome,
        step_number: i32,
    ) -> Result<bool, StoreError> {
        Ok(self.state().event_states.get(&saga_id).is_some_and(|log| {
            log.iter()
                .any(|e| e.event_type == event_type && e.outcome == outcome && e.step_number == step_number)
        }))
    }

    async fn find_stalled_sagas(&self, older_than: Timestamp, limit: i64) -> Result<Vec<Saga>, StoreError> {
        let mut stalled: Vec<Saga> = self
            .state()
            .sagas
            .values()
            .filter(|s| !s.status.is_terminal() && s.updated_at < older_than)
            .cloned()
            .collect();
        stalled.sort_by_key(|s| s.updated_at);
        stalled.truncate(limit.max(0) as usize);
        Ok(stalled)
    }

    async fn list_sagas_by_status(&self, status: SagaStatus, limit: i64) -> Result<Vec<Saga>, StoreError> {
        let mut sagas: Vec<Saga> = self
            .state()
            .sagas
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect();
        sagas.sort_by_key(|s| s.updated_at);
        sagas.truncate(limit.max(0) as usize);
        Ok(sagas)
    }

    async fn purge_orphaned_sagas(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let mut state = self.state();
        let orphaned: Vec<DbId> = state
            .sagas
            .values()
            .filter(|s| s.status.is_terminal() && s.updated_at < cutoff)
            .filter(|s| !state.students.contains_key(&s.student_id))
            .map(|s| s.id)
            .collect();
        for saga_id in &orphaned {
            state.sagas.remove(saga_id);
            state.event_states.remove(saga_id);
        }
        Ok(orphaned.len() as u64)
    }
}

#[async_trait]
impl ErrorStudentStore for InMemoryStore {
    async fn list_error_students(&self, fileset_id: DbId) -> Result<Vec<ErrorStudentFlag>, StoreError> {
        Ok(self
            .state()
            .flags
            .values()
            .filter(|f| f.fileset_id == fileset_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Registry gateway over fixed data, with injectable transient failures.
#[derive(Default)]
pub struct InMemoryGateway {
    students: HashMap<String, RegistryStudent>,
    grad_records: HashMap<DbId, GradStudentRecord>,
    histories: HashMap<DbId, Vec<StudentCourseRecord>>,
    courses: Vec<CourseRecord>,
    codes: CodeTables,
    failures_left: AtomicU32,
    calls: AtomicU32,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_student(mut self, student: RegistryStudent) -> Self {
        self.students.insert(student.pen.clone(), student);
        self
    }

    pub fn with_grad_record(mut self, record: GradStudentRecord) -> Self {
        self.grad_records.insert(record.student_id, record);
        self
    }

    pub fn with_course_history(mut self, student_id: DbId, history: Vec<StudentCourseRecord>) -> Self {
        self.histories.insert(student_id, history);
        self
    }

    pub fn with_course(mut self, course: CourseRecord) -> Self {
        self.courses.push(course);
        self
    }

    pub fn with_codes(mut self, codes: CodeTables) -> Self {
        self.codes = codes;
        self
    }

    /// Make the next `n` calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Total calls made, failed ones included.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn call(&self) -> Result<(), GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            Err(GatewayError::Transient("injected registry timeout".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ExternalDataGateway for InMemoryGateway {
    async fn student_by_pen(&self, pen: &str) -> Result<Option<RegistryStudent>, GatewayError> {
        self.call()?;
        Ok(self.students.get(pen).cloned())
    }

    async fn grad_student_record(&self, student_id: DbId) -> Result<Option<GradStudentRecord>, GatewayError> {
        self.call()?;
        Ok(self.grad_records.get(&student_id).cloned())
    }

    async fn student_course_history(&self, student_id: DbId) -> Result<Vec<StudentCourseRecord>, GatewayError> {
        self.call()?;
        Ok(self.histories.get(&student_id).cloned().unwrap_or_default())
    }

    async fn course(
        &self,
        course_code: &str,
        course_level: Option<&str>,
    ) -> Result<Option<CourseRecord>, GatewayError> {
        self.call()?;
        let level = course_level.unwrap_or("").trim();
        Ok(self
            .courses
            .iter()
            .find(|c| {
                c.course_code.eq_ignore_ascii_case(course_code.trim())
                    && c.course_level.as_deref().unwrap_or("").trim().eq_ignore_ascii_case(level)
            })
            .cloned())
    }

    async fn code_tables(&self) -> Result<CodeTables, GatewayError> {
        self.call()?;
        Ok(self.codes.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use gdc_core::fileset::FilesetOwner;
    use gdc_core::saga::ValidationPayload;
    use gdc_core::student::{fields, FieldMap};
    use gdc_core::types::new_id;

    use super::*;

    fn key() -> FilesetKey {
        FilesetKey {
            owner: FilesetOwner::School(new_id()),
            reporting_period_id: new_id(),
        }
    }

    fn upload(file_type: FileType, pens: &[&str]) -> ParsedUpload {
        ParsedUpload {
            file_type,
            file_name: format!("x.{}", file_type.extension()),
            uploaded_at: Utc::now(),
            students: pens
                .iter()
                .map(|pen| {
                    let mut map = FieldMap::new();
                    map.insert(fields::PEN.into(), pen.to_string());
                    AnyStudent::from_fields(file_type, &map)
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn second_active_saga_for_student_is_refused() {
        let store = InMemoryStore::new();
        let change = store.replace_file(key(), upload(FileType::Demographic, &["1"])).await.unwrap();
        let payload = ValidationPayload {
            student: change.students[0].clone(),
            upload_date: Utc::now().date_naive(),
            mincode: None,
        };
        let (a, a_entry) = Saga::start(payload.clone(), Utc::now());
        let (b, b_entry) = Saga::start(payload, Utc::now());
        assert!(store.create_saga(&a, &a_entry).await.unwrap());
        assert!(!store.create_saga(&b, &b_entry).await.unwrap());
    }

    #[tokio::test]
    async fn stale_copy_cannot_overwrite_newer_step() {
        let store = InMemoryStore::new();
        let change = store.replace_file(key(), upload(FileType::Course, &["1"])).await.unwrap();
        let payload = ValidationPayload {
            student: change.students[0].clone(),
            upload_date: Utc::now().date_naive(),
            mincode: None,
        };
        let (mut saga, entry) = Saga::start(payload, Utc::now());
        store.create_saga(&saga, &entry).await.unwrap();
        saga.mark_dispatched(Utc::now());
        assert!(store.update_saga(&saga).await.unwrap());

        let stale = saga.clone();
        let (_, entries) = saga
            .advance(SagaState::ValidateStudent, EventOutcome::StudentNotFound, None, Utc::now())
            .unwrap();
        assert!(store.record_transition(&saga, &entries, None).await.unwrap());
        assert!(!store.update_saga(&stale).await.unwrap());
        assert_eq!(store.find_saga(saga.id).await.unwrap().unwrap().status, SagaStatus::Completed);
    }

    #[tokio::test]
    async fn status_save_from_stale_copy_is_refused() {
        let store = InMemoryStore::new();
        let key = key();
        let first = store.replace_file(key, upload(FileType::Demographic, &["1"])).await.unwrap();
        let mut stale = first.fileset.clone();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store.replace_file(key, upload(FileType::Course, &["1"])).await.unwrap();

        stale.apply_settlement(|_| 0);
        assert!(!store.save_fileset_status(&stale).await.unwrap());
        let stored = store.find_fileset(first.fileset.id).await.unwrap().unwrap();
        assert_eq!(stored.course.status, gdc_core::fileset::FileStatus::Loaded);
    }

    #[tokio::test]
    async fn completion_replaces_flags_only_from_a_current_copy() {
        use gdc_core::finalize::FlagReason;
        use gdc_core::validation::Severity;

        let store = InMemoryStore::new();
        let key = key();
        let first = store.replace_file(key, upload(FileType::Demographic, &["1", "2"])).await.unwrap();
        let fileset_id = first.fileset.id;
        let flag = |pen: &str, reason| ErrorStudentFlag {
            fileset_id,
            pen: pen.into(),
            reason,
            severity: Severity::Warning,
            file_type: FileType::Demographic,
        };

        let mut stale = first.fileset.clone();
        stale.status = FilesetStatus::Completed;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = store.replace_file(key, upload(FileType::Course, &["1"])).await.unwrap();
        assert!(!store
            .complete_fileset(&stale, &[flag("1", FlagReason::NotValidated)])
            .await
            .unwrap());
        assert!(store.list_error_students(fileset_id).await.unwrap().is_empty());

        let mut current = second.fileset.clone();
        current.status = FilesetStatus::Completed;
        let flags = vec![flag("2", FlagReason::MissingCourseRecords)];
        assert!(store.complete_fileset(&current, &flags).await.unwrap());
        assert_eq!(store.list_error_students(fileset_id).await.unwrap(), flags);
        let stored = store.find_fileset(fileset_id).await.unwrap().unwrap();
        assert_eq!(stored.status, FilesetStatus::Completed);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let gateway = InMemoryGateway::new();
        gateway.fail_next(2);
        assert!(gateway.code_tables().await.is_err());
        assert!(gateway.code_tables().await.is_err());
        assert!(gateway.code_tables().await.is_ok());
        assert_eq!(gateway.calls(), 3);
    }
}
