pub mod journal;
pub mod publisher;
