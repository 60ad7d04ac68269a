pub mod grader;
pub mod picks;
pub mod reconciler;
pub mod summary;
pub mod types;
