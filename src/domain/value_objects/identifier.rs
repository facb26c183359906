use chrono::Utc;
use rand::Rng;

/// Sortable-enough unique id: `{prefix}-{unix millis hex}-{random hex}`.
pub fn new_id(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let salt: u32 = rand::thread_rng().gen();
    format!("{}-{:x}-{:08x}", prefix, millis, salt)
}
