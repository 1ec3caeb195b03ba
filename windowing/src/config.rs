#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub title: String,
    pub resolution: (u32, u32),
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "prism".to_string(),
            resolution: (1280, 720),
        }
    }
}
