pub mod log;

pub use log::enable_logging;

pub fn setup_debugging() {
    #[cfg(debug_assertions)]
    std::env::set_var("RUST_BACKTRACE", "1");

    enable_logging();
}
