use rand::Rng;

pub const ACCOUNT_NUMBER_PREFIX: &str = "62";

pub fn generate_bank_account_number(length: usize) -> String {
    let mut rng = rand::thread_rng();
    let digits: String = (0..length)
        .map(|_| rng.gen_range(0..10).to_string())
        .collect();
    format!("{}{}", ACCOUNT_NUMBER_PREFIX, digits)
}
