//! Store behaviour against a real database. Run with `DATABASE_URL` set and
//! `cargo test -- --ignored`.

use chrono::{NaiveDate, Utc};
use gdc_core::fileset::{FileStatus, FileType, FilesetKey, FilesetOwner, FilesetStatus, ReportingPeriod};
use gdc_core::finalize::{ErrorStudentFlag, FlagReason};
use gdc_core::reconcile::ParsedUpload;
use gdc_core::saga::{EventOutcome, Saga, SagaState, SagaStatus, ValidationPayload, ValidationResult, VALIDATION_SAGA};
use gdc_core::store::{ErrorStudentStore, FilesetStore, SagaStore, StudentStore};
use gdc_core::student::{fields, AnyStudent, FieldMap, StudentStatus};
use gdc_core::types::new_id;
use gdc_core::validation::{FieldCode, IssueCode, RuleId, Severity, ValidationIssue};
use gdc_db::PgStore;
use sqlx::PgPool;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

async fn seeded(pool: PgPool) -> (PgStore, FilesetKey) {
    let store = PgStore::new(pool);
    let period = ReportingPeriod {
        id: new_id(),
        school_year_start: date(2024, 10, 1),
        school_year_end: date(2025, 6, 30),
        summer_start: date(2025, 7, 1),
        summer_end: date(2025, 9, 30),
    };
    store.save_reporting_period(&period).await.unwrap();
    let key = FilesetKey {
        owner: FilesetOwner::School(new_id()),
        reporting_period_id: period.id,
    };
    (store, key)
}

fn upload(file_type: FileType, pens: &[&str]) -> ParsedUpload {
    let students = pens
        .iter()
        .map(|pen| {
            let map: FieldMap = [
                (fields::TRANSACTION_CODE, file_type.transaction_code()),
                (fields::MINCODE, "03939001"),
                (fields::PEN, *pen),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
            AnyStudent::from_fields(file_type, &map)
        })
        .collect();
    ParsedUpload {
        file_type,
        file_name: format!("03939001.{}", file_type.extension()),
        uploaded_at: Utc::now(),
        students,
    }
}

// -- health / periods ---------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn health_check_and_active_period(pool: PgPool) {
    gdc_db::health_check(&pool).await.unwrap();
    let (store, key) = seeded(pool).await;

    let summer = store.active_reporting_period(date(2025, 8, 1)).await.unwrap().unwrap();
    assert_eq!(summer.id, key.reporting_period_id);
    assert!(store.active_reporting_period(date(2024, 9, 1)).await.unwrap().is_none());
}

// -- reconcile ----------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn replace_file_swaps_only_that_collection(pool: PgPool) {
    let (store, key) = seeded(pool).await;

    let dem = store.replace_file(key, upload(FileType::Demographic, &["111111111"])).await.unwrap();
    assert!(dem.created);
    let crs = store
        .replace_file(key, upload(FileType::Course, &["111111111", "111111111"]))
        .await
        .unwrap();
    assert_eq!(crs.fileset.id, dem.fileset.id);

    let again = store
        .replace_file(key, upload(FileType::Course, &["222222222"]))
        .await
        .unwrap();
    assert!(!again.created);

    let courses = store.list_students(dem.fileset.id, Some(FileType::Course)).await.unwrap();
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0].header().pen.as_deref(), Some("222222222"));
    assert_eq!(store.list_students(dem.fileset.id, None).await.unwrap().len(), 2);

    let found = store.find_demographic_by_pen(dem.fileset.id, "111111111").await.unwrap();
    assert!(found.is_some());

    let fileset = store.find_fileset(dem.fileset.id).await.unwrap().unwrap();
    assert_eq!(fileset.course.status, FileStatus::Loaded);
    assert_eq!(fileset.assessment.status, FileStatus::NotLoaded);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn upload_after_completion_supersedes(pool: PgPool) {
    let (store, key) = seeded(pool).await;
    let first = store.replace_file(key, upload(FileType::Demographic, &["111111111"])).await.unwrap();

    let mut done = first.fileset.clone();
    done.status = FilesetStatus::Completed;
    assert!(store.save_fileset_status(&done).await.unwrap());

    let next = store.replace_file(key, upload(FileType::Assessment, &["111111111"])).await.unwrap();
    assert!(next.created);
    assert_eq!(next.superseded, Some(first.fileset.id));

    let old = store.find_fileset(first.fileset.id).await.unwrap().unwrap();
    assert_eq!(old.status, FilesetStatus::Superseded);
    let superseded = store.list_filesets_by_status(FilesetStatus::Superseded).await.unwrap();
    assert_eq!(superseded.len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn purge_removes_stale_loaded_filesets(pool: PgPool) {
    let (store, key) = seeded(pool).await;
    let change = store.replace_file(key, upload(FileType::Demographic, &["111111111"])).await.unwrap();

    assert_eq!(store.purge_stale_filesets(Utc::now() - chrono::Duration::days(1)).await.unwrap(), 0);
    assert_eq!(store.purge_stale_filesets(Utc::now() + chrono::Duration::seconds(1)).await.unwrap(), 1);
    assert!(store.find_fileset(change.fileset.id).await.unwrap().is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn purge_removes_superseded_and_keeps_completed(pool: PgPool) {
    let (store, key) = seeded(pool).await;
    let first = store.replace_file(key, upload(FileType::Demographic, &["111111111"])).await.unwrap();
    let mut done = store.find_fileset(first.fileset.id).await.unwrap().unwrap();
    done.status = FilesetStatus::Completed;
    assert!(store.complete_fileset(&done, &[]).await.unwrap());

    let second = store.replace_file(key, upload(FileType::Demographic, &["111111111"])).await.unwrap();
    let mut done = store.find_fileset(second.fileset.id).await.unwrap().unwrap();
    done.status = FilesetStatus::Completed;
    assert!(store.complete_fileset(&done, &[]).await.unwrap());

    assert_eq!(store.purge_stale_filesets(Utc::now() + chrono::Duration::seconds(1)).await.unwrap(), 1);
    assert!(store.find_fileset(first.fileset.id).await.unwrap().is_none());
    assert!(store.find_fileset(second.fileset.id).await.unwrap().is_some());
}

// -- sagas --------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn saga_lifecycle_writes_result_onto_student(pool: PgPool) {
    let (store, key) = seeded(pool).await;
    let change = store.replace_file(key, upload(FileType::Demographic, &["111111111"])).await.unwrap();
    let student = change.students[0].clone();
    let student_id = student.id();

    let payload = ValidationPayload {
        student,
        upload_date: date(2025, 1, 15),
        mincode: Some("03939001".into()),
    };
    let (mut saga, entry) = Saga::start(payload.clone(), Utc::now());
    assert!(store.create_saga(&saga, &entry).await.unwrap());
    assert!(store.saga_exists(student_id, VALIDATION_SAGA).await.unwrap());

    let (duplicate, duplicate_entry) = Saga::start(payload, Utc::now());
    assert!(!store.create_saga(&duplicate, &duplicate_entry).await.unwrap());

    saga.mark_dispatched(Utc::now());
    assert!(store.update_saga(&saga).await.unwrap());
    assert_eq!(store.unsettled_students(change.fileset.id, FileType::Demographic).await.unwrap(), 1);

    let issues = vec![ValidationIssue::new(RuleId::D05, FieldCode::LegalSurname, IssueCode::StudentSurnameBlank)];
    let result = ValidationResult::new(student_id, issues);
    let outcome = EventOutcome::for_issues(&result.issues);
    let (_, entries) = saga
        .advance(SagaState::ValidateStudent, outcome, None, Utc::now())
        .unwrap();
    assert!(store.record_transition(&saga, &entries, Some(&result)).await.unwrap());
    // A second writer with the same steps loses.
    assert!(!store.record_transition(&saga, &entries, Some(&result)).await.unwrap());

    let stored = store.find_saga(saga.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SagaStatus::Completed);
    assert_eq!(store.event_states(saga.id).await.unwrap().len(), 3);
    assert!(store
        .event_state_exists(saga.id, SagaState::MarkSagaComplete, EventOutcome::SagaCompleted, 3)
        .await
        .unwrap());

    let updated = store.find_student(student_id).await.unwrap().unwrap();
    assert_eq!(updated.header().status, result.status);
    assert_eq!(updated.header().issues, result.issues);
    assert_eq!(store.unsettled_students(change.fileset.id, FileType::Demographic).await.unwrap(), 0);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn stalled_sagas_are_found_oldest_first(pool: PgPool) {
    let (store, key) = seeded(pool).await;
    let change = store
        .replace_file(key, upload(FileType::Course, &["111111111", "222222222"]))
        .await
        .unwrap();
    let long_ago = Utc::now() - chrono::Duration::hours(2);
    for (i, student) in change.students.iter().enumerate() {
        let payload = ValidationPayload {
            student: student.clone(),
            upload_date: date(2025, 1, 15),
            mincode: None,
        };
        let (saga, entry) = Saga::start(payload, long_ago + chrono::Duration::minutes(i as i64));
        assert!(store.create_saga(&saga, &entry).await.unwrap());
    }

    let stalled = store
        .find_stalled_sagas(Utc::now() - chrono::Duration::hours(1), 10)
        .await
        .unwrap();
    assert_eq!(stalled.len(), 2);
    assert!(stalled[0].updated_at <= stalled[1].updated_at);
    assert_eq!(store.list_sagas_by_status(SagaStatus::Initiated, 1).await.unwrap().len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn orphaned_terminal_sagas_are_purged(pool: PgPool) {
    let (store, key) = seeded(pool).await;
    let change = store.replace_file(key, upload(FileType::Course, &["111111111"])).await.unwrap();
    let payload = ValidationPayload {
        student: change.students[0].clone(),
        upload_date: date(2025, 1, 15),
        mincode: None,
    };
    let (mut saga, entry) = Saga::start(payload, Utc::now());
    assert!(store.create_saga(&saga, &entry).await.unwrap());
    saga.mark_dispatched(Utc::now());
    assert!(store.update_saga(&saga).await.unwrap());
    let (_, entries) = saga
        .advance(SagaState::ValidateStudent, EventOutcome::StudentNotFound, None, Utc::now())
        .unwrap();
    assert!(store.record_transition(&saga, &entries, None).await.unwrap());

    let cutoff = Utc::now() + chrono::Duration::seconds(1);
    assert_eq!(store.purge_orphaned_sagas(cutoff).await.unwrap(), 0);

    store.replace_file(key, upload(FileType::Course, &["111111111"])).await.unwrap();
    assert_eq!(store.purge_orphaned_sagas(cutoff).await.unwrap(), 1);
    assert!(store.find_saga(saga.id).await.unwrap().is_none());
    assert!(store.event_states(saga.id).await.unwrap().is_empty());
}

// -- error students -------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn completion_replaces_flags_and_reingest_clears_them(pool: PgPool) {
    let (store, key) = seeded(pool).await;
    let change = store.replace_file(key, upload(FileType::Demographic, &["111111111"])).await.unwrap();
    let flag = |reason| ErrorStudentFlag {
        fileset_id: change.fileset.id,
        pen: "111111111".into(),
        reason,
        severity: Severity::Warning,
        file_type: FileType::Demographic,
    };

    let stale = store.find_fileset(change.fileset.id).await.unwrap().unwrap();
    store.replace_file(key, upload(FileType::Course, &["111111111"])).await.unwrap();
    let mut completed = stale.clone();
    completed.status = FilesetStatus::Completed;
    assert!(!store
        .complete_fileset(&completed, &[flag(FlagReason::NotValidated)])
        .await
        .unwrap());
    assert!(store.list_error_students(change.fileset.id).await.unwrap().is_empty());

    let mut completed = store.find_fileset(change.fileset.id).await.unwrap().unwrap();
    completed.status = FilesetStatus::Completed;
    let flags = vec![flag(FlagReason::MissingCourseRecords)];
    assert!(store.complete_fileset(&completed, &flags).await.unwrap());
    assert_eq!(store.list_error_students(change.fileset.id).await.unwrap(), flags);
    // The copy is now stale; a second completion from it writes nothing.
    assert!(!store.complete_fileset(&completed, &[]).await.unwrap());
    assert_eq!(store.list_error_students(change.fileset.id).await.unwrap(), flags);

    let mut reopened = store.find_fileset(change.fileset.id).await.unwrap().unwrap();
    reopened.status = FilesetStatus::Loaded;
    assert!(store.save_fileset_status(&reopened).await.unwrap());
    store.replace_file(key, upload(FileType::Course, &["111111111"])).await.unwrap();
    assert!(store.list_error_students(change.fileset.id).await.unwrap().is_empty());
    let dem = store.list_students(change.fileset.id, Some(FileType::Demographic)).await.unwrap();
    assert_eq!(dem[0].header().status, StudentStatus::Loaded);
}
