/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// Sites are identified by their database id.
pub type SiteId = DbId;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
