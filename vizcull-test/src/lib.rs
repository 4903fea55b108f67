mod helpers;
mod runner;

pub use helpers::*;
pub use runner::{TestRunner, TestRunnerBuilder};

/// Routes `log` output through the test harness. Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
