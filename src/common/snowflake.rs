use lazy_static::lazy_static;
use parking_lot::Mutex;
use snowflake::SnowflakeIdGenerator;

lazy_static! {
    static ref GENERATOR: Mutex<SnowflakeIdGenerator> = Mutex::new(SnowflakeIdGenerator::new(1, 1));
}

/// Re-seeds the generator with this node's identity. Call once at startup so
/// that several instances never hand out the same id.
pub fn configure_generator(machine_id: i32, node_id: i32) {
    *GENERATOR.lock() = SnowflakeIdGenerator::new(machine_id, node_id);
}

pub fn generate_transaction_reference(prefix: &str) -> String {
    let mut generator = GENERATOR.lock();
    let unique_id = generator.real_time_generate();
    format!("{}{}", prefix, unique_id)
}
