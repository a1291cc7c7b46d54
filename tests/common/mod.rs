#![allow(dead_code)]

pub use taskwarden_test_utils::builders;
pub use taskwarden_test_utils::fake_executor::FakeExecutor;
pub use taskwarden_test_utils::{init_tracing, with_timeout};

use std::path::PathBuf;

/// Path of a file under `tests/fixtures`.
pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}
