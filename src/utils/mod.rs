pub mod version;

pub use version::{compare_versions, is_newer};

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
