//! Staged transfer scheduler.
//!
//! Batches host-to-device copies recorded between `begin` and `submit`
//! into one submission on the transfer queue. Staging buffers handed to
//! the scheduler stay alive until the submission's fence is observed.

use crate::command::{begin_command_buffer, end_command_buffer, submit_command_buffers, CommandPool};
use crate::device::GpuContext;
use crate::error::Result;
use crate::memory::GpuBuffer;
use crate::sync::{create_fence, reset_fence, wait_for_fence};
use ash::vk;

/// Batches transfer commands into per-submission command buffers.
pub struct TransferScheduler {
    pool: CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    recording: bool,
    in_flight: bool,
    staging: Vec<GpuBuffer>,
    in_flight_staging: Vec<GpuBuffer>,
}

impl TransferScheduler {
    /// Create the scheduler on the context's transfer queue family.
    ///
    /// # Safety
    /// The GPU context must be valid.
    pub unsafe fn new(gpu: &GpuContext) -> Result<Self> {
        let pool = CommandPool::new(
            gpu.device(),
            gpu.queue_families().transfer,
            vk::CommandPoolCreateFlags::empty(),
        )?;
        let command_buffer = pool.allocate_command_buffer(gpu.device())?;

        Ok(Self {
            pool,
            command_buffer,
            fence: create_fence(gpu.device(), false)?,
            recording: false,
            in_flight: false,
            staging: Vec::new(),
            in_flight_staging: Vec::new(),
        })
    }

    /// Get (and open, if needed) the transfer command buffer.
    ///
    /// Blocks until a previous submission completes so the pool can be
    /// recycled.
    ///
    /// # Safety
    /// The GPU context must be valid.
    pub unsafe fn begin(&mut self, gpu: &GpuContext) -> Result<vk::CommandBuffer> {
        if self.in_flight {
            wait_for_fence(gpu.device(), self.fence, u64::MAX)?;
            self.in_flight = false;
            for buffer in self.in_flight_staging.drain(..) {
                buffer.destroy(gpu.device(), gpu.allocator());
            }
        }

        if !self.recording {
            self.pool.reset(gpu.device())?;
            begin_command_buffer(
                gpu.device(),
                self.command_buffer,
                vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            )?;
            self.recording = true;
        }

        Ok(self.command_buffer)
    }

    /// Keep a staging buffer alive until the current batch completes on
    /// the GPU.
    pub fn keep_staging(&mut self, buffer: GpuBuffer) {
        self.staging.push(buffer);
    }

    /// Submit the recorded batch, if any. Returns whether anything was
    /// submitted.
    ///
    /// # Safety
    /// The GPU context must be valid.
    pub unsafe fn submit(&mut self, gpu: &GpuContext) -> Result<bool> {
        if !self.recording {
            return Ok(false);
        }

        end_command_buffer(gpu.device(), self.command_buffer)?;
        reset_fence(gpu.device(), self.fence)?;

        {
            let queue = gpu.transfer_queue();
            let _guard = queue.lock_submit();
            submit_command_buffers(
                gpu.device(),
                queue.handle(),
                &[self.command_buffer],
                &[],
                &[],
                &[],
                self.fence,
            )?;
        }

        self.recording = false;
        self.in_flight = true;
        self.in_flight_staging.append(&mut self.staging);

        Ok(true)
    }

    /// Tear the scheduler down, draining any in-flight batch.
    ///
    /// # Safety
    /// The GPU context must be valid.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext) -> Result<()> {
        if self.in_flight {
            wait_for_fence(gpu.device(), self.fence, u64::MAX)?;
            self.in_flight = false;
        }
        for buffer in self.in_flight_staging.drain(..) {
            buffer.destroy(gpu.device(), gpu.allocator());
        }
        for buffer in self.staging.drain(..) {
            buffer.destroy(gpu.device(), gpu.allocator());
        }
        gpu.device().destroy_fence(self.fence, None);
        self.pool.destroy(gpu.device());
        Ok(())
    }
}
