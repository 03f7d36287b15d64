mod device;
pub use device::*;

mod temp;
pub use temp::*;

/// Route `log` output to the test harness, safe to call more than once
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
