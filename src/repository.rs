pub mod adapter;
#[cfg(test)]
pub mod memory;
pub mod postgres;
