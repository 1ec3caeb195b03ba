pub mod config;
pub mod window;

pub use config::WindowConfig;
pub use window::EngineWindow;
