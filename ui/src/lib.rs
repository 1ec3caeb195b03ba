mod gui;
mod swapchain_info;

pub use gui::{Gui, OverlayCallback, UiError};
pub use swapchain_info::SwapchainInfo;
