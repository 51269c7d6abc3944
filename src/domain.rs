pub mod events;
pub mod finance;
pub mod models;
