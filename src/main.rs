mod camera;
mod engine;

use winit::event_loop::EventLoop;

use asset::Config;

use crate::engine::{Engine, EngineError};

fn main() {
    debug::setup_debugging();

    match run() {
        Ok(()) => {}
        Err(err) => {
            tracing::error!("{err}");
            std::process::exit(-1);
        }
    }
}

fn run() -> Result<(), EngineError> {
    let config = Config::load("config.json")?;

    let event_loop = EventLoop::new()?;
    let mut engine = Engine::new(config);
    event_loop.run_app(&mut engine)?;

    engine.into_result()
}
