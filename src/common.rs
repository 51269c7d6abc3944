pub mod account;
pub mod error;
pub mod money;
pub mod snowflake;
