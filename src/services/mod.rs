pub mod cache;
pub mod executor;
pub mod queue;
pub mod results;
pub mod submission;
pub mod worker;
