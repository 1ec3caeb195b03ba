use std::sync::Arc;

use thiserror::Error;
use vulkano::instance::{Instance, InstanceExtensions};
use vulkano::swapchain::Surface;
use vulkano::VulkanLibrary;
use winit::dpi::LogicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

use crate::config::WindowConfig;

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("failed to create window: {0}")]
    Creation(#[from] winit::error::OsError),
    #[error("failed to create surface: {0}")]
    Surface(#[from] vulkano::swapchain::FromWindowError),
}

/// Wraps the winit window together with the per-frame flags the renderer polls.
pub struct EngineWindow {
    window: Arc<Window>,
    framebuffer_resized: bool,
    iconified: bool,
    close_requested: bool,
}

impl EngineWindow {
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self, WindowError> {
        let attributes = Window::default_attributes()
            .with_inner_size(LogicalSize {
                width: config.resolution.0,
                height: config.resolution.1,
            })
            .with_title(config.title.clone());

        let window = Arc::new(event_loop.create_window(attributes)?);

        let size = window.inner_size();
        tracing::info!("window created: {}x{}", size.width, size.height);

        Ok(EngineWindow {
            window,
            framebuffer_resized: false,
            iconified: false,
            close_requested: false,
        })
    }

    pub fn create_surface(&self, instance: Arc<Instance>) -> Result<Arc<Surface>, WindowError> {
        Ok(Surface::from_window(instance, self.window.clone())?)
    }

    pub fn window(&self) -> Arc<Window> {
        self.window.clone()
    }

    pub fn inner_size(&self) -> [u32; 2] {
        let size = self.window.inner_size();
        [size.width, size.height]
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    pub fn iconified(&self) -> bool {
        let size = self.window.inner_size();
        self.iconified || size.width == 0 || size.height == 0
    }

    pub fn set_iconified(&mut self, iconified: bool) {
        self.iconified = iconified;
    }

    pub fn framebuffer_resized(&self) -> bool {
        self.framebuffer_resized
    }

    pub fn set_framebuffer_resized(&mut self, resized: bool) {
        self.framebuffer_resized = resized;
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    pub fn set_should_close(&mut self) {
        self.close_requested = true;
    }
}

/// The surface extensions we would like, reduced to what the library supports.
pub fn required_instance_extensions(library: &VulkanLibrary) -> InstanceExtensions {
    let ideal = InstanceExtensions {
        khr_surface: true,
        khr_xlib_surface: true,
        khr_xcb_surface: true,
        khr_wayland_surface: true,
        khr_android_surface: true,
        khr_win32_surface: true,
        mvk_ios_surface: true,
        mvk_macos_surface: true,
        khr_get_physical_device_properties2: true,
        khr_get_surface_capabilities2: true,
        ..InstanceExtensions::empty()
    };

    library.supported_extensions().intersection(&ideal)
}
