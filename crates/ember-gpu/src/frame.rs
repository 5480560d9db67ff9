//! Per-frame slot resources.

use crate::command::CommandPool;
use crate::error::Result;
use crate::sync::{create_fence, create_semaphore, reset_fence, wait_for_fence};
use ash::vk;

/// Callback fired once a frame's GPU work is observed complete.
pub type FrameSignal = Box<dyn FnOnce() + Send>;

/// Resources owned by one slot of the frame ring.
///
/// Each slot carries its own command pool so recycling a frame's commands
/// is a single pool reset, plus the fence and semaphores that tie the
/// acquire/submit/present chain together.
pub struct FrameSlot {
    pub pool: CommandPool,
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when the slot's submission finishes on the GPU.
    pub fence: vk::Fence,
    /// Signaled by the swapchain when the slot's image is ready to render.
    pub image_available: vk::Semaphore,
    /// Signaled by the submission; presentation waits on it.
    pub image_presentable: vk::Semaphore,
    signals: Vec<FrameSignal>,
}

impl FrameSlot {
    /// Create the slot's resources. The fence starts signaled so the first
    /// frame through the slot does not wait.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let pool = CommandPool::new(
            device,
            queue_family,
            vk::CommandPoolCreateFlags::empty(),
        )?;
        let command_buffer = pool.allocate_command_buffer(device)?;

        Ok(Self {
            pool,
            command_buffer,
            fence: create_fence(device, true)?,
            image_available: create_semaphore(device)?,
            image_presentable: create_semaphore(device)?,
            signals: Vec::new(),
        })
    }

    /// Wait until the slot's previous submission completes.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait(&self, device: &ash::Device) -> Result<()> {
        wait_for_fence(device, self.fence, u64::MAX)
    }

    /// Reset the fence ahead of the next submission.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn reset_fence(&self, device: &ash::Device) -> Result<()> {
        reset_fence(device, self.fence)
    }

    /// Register a callback for the completion of the frame currently using
    /// this slot.
    pub fn add_signal(&mut self, signal: FrameSignal) {
        self.signals.push(signal);
    }

    /// Fire and clear all registered completion callbacks.
    pub fn fire_signals(&mut self) {
        for signal in self.signals.drain(..) {
            signal();
        }
    }

    /// Destroy the slot's resources.
    ///
    /// # Safety
    /// The slot must not be in use by the GPU.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        self.signals.clear();
        device.destroy_fence(self.fence, None);
        device.destroy_semaphore(self.image_available, None);
        device.destroy_semaphore(self.image_presentable, None);
        self.pool.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    // Signal bookkeeping is pure; exercise it without a device.
    fn slot_signals() -> Vec<FrameSignal> {
        Vec::new()
    }

    #[test]
    fn signals_fire_once_and_clear() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut signals = slot_signals();

        for _ in 0..3 {
            let counter = counter.clone();
            signals.push(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        for signal in signals.drain(..) {
            signal();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(signals.is_empty());
    }
}
