//! Database models.

pub mod file;
pub mod job;

pub use file::StoredFileDbModel;
pub use job::{JobDbModel, JobFilter, JobStatus, Pagination, SortBy, SortOrder};
