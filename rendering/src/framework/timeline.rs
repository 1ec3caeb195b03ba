use vulkano::sync::future::FenceSignalFuture;
use vulkano::sync::GpuFuture;

use crate::error::RenderError;

/// Frame-slot gating. Each swapchain image slot owns a monotonically
/// increasing 64-bit value and the fence-backed future of its last
/// submission; re-recording into the slot first waits that future, which is
/// when the previously signaled value is observed as reached.
pub struct TimelineSlot {
    value: u64,
    completed: u64,
    in_flight: Option<FenceSignalFuture<Box<dyn GpuFuture>>>,
}

impl TimelineSlot {
    pub fn new(initial_value: u64) -> TimelineSlot {
        TimelineSlot {
            value: initial_value,
            completed: 0,
            in_flight: None,
        }
    }

    /// Blocks until the slot's previous submission finished. A slot that was
    /// never submitted to (or was abandoned) returns immediately.
    pub fn wait_previous(&mut self) -> Result<(), RenderError> {
        if let Some(fence) = self.in_flight.take() {
            fence.wait(None)?;
            self.completed = self.value.saturating_sub(1);
        }
        Ok(())
    }

    /// Hands out the next strictly increasing signal value.
    pub fn next_signal_value(&mut self) -> u64 {
        let value = self.value;
        self.value += 1;
        value
    }

    pub fn store(&mut self, fence: FenceSignalFuture<Box<dyn GpuFuture>>) {
        self.in_flight = Some(fence);
    }

    /// Drops the pending submission without recording completion, used when
    /// presentation reported an out-of-date swapchain.
    pub fn abandon(&mut self) {
        self.in_flight = None;
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn completed_value(&self) -> u64 {
        self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_values_strictly_increase_from_the_frame_count() {
        let mut slot = TimelineSlot::new(3);
        assert_eq!(slot.next_signal_value(), 3);
        assert_eq!(slot.next_signal_value(), 4);
        assert_eq!(slot.value(), 5);
    }

    #[test]
    fn waiting_an_idle_slot_is_a_no_op() {
        let mut slot = TimelineSlot::new(3);
        slot.wait_previous().unwrap();
        assert_eq!(slot.completed_value(), 0);
    }
}
