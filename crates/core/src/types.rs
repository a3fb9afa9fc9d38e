/// All primary keys are UUIDv7, generated application-side so sagas and
/// student records can be referenced before they are persisted.
pub type DbId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a new time-ordered primary key.
pub fn new_id() -> DbId {
    uuid::Uuid::now_v7()
}
