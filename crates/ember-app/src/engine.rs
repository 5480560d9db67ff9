//! Engine context: window, GPU, render target and transfer scheduling.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use ember_gpu::{
    FrameContext, FrameSignal, GpuContext, RenderTarget, Result, Surface, SurfaceStatus,
    TargetConfig, TransferScheduler,
};
use winit::window::Window;

/// Everything an application needs to talk to the engine.
pub struct Engine {
    pub window: Arc<Window>,
    gpu: GpuContext,
    target: Option<RenderTarget>,
    transfers: TransferScheduler,
    pub(crate) last_frame_time: Instant,
    /// Frames presented since startup.
    pub frame_count: u64,
}

impl Engine {
    /// Create the engine over an existing window and GPU context.
    ///
    /// # Safety
    /// The GPU context must be valid and the window must outlive the
    /// engine.
    pub unsafe fn new(
        window: Arc<Window>,
        gpu: GpuContext,
        target_config: TargetConfig,
    ) -> Result<Self> {
        let size = window.inner_size();
        let surface = Surface::from_window(&gpu, window.as_ref())?;
        let target = RenderTarget::new(&gpu, surface, size.width, size.height, target_config)?;
        let transfers = TransferScheduler::new(&gpu)?;

        Ok(Self {
            window,
            gpu,
            target: Some(target),
            transfers,
            last_frame_time: Instant::now(),
            frame_count: 0,
        })
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// The window's render target.
    pub fn target(&self) -> &RenderTarget {
        self.target.as_ref().expect("target alive until cleanup")
    }

    pub fn target_mut(&mut self) -> &mut RenderTarget {
        self.target.as_mut().expect("target alive until cleanup")
    }

    /// Whether the target is currently presentable.
    pub fn rendering_enabled(&self) -> bool {
        self.target().enabled()
    }

    /// Get the transfer command buffer, opening a new batch if needed.
    pub fn begin_transfer(&mut self) -> Result<vk::CommandBuffer> {
        unsafe { self.transfers.begin(&self.gpu) }
    }

    /// Keep a staging buffer alive until the current transfer batch has
    /// executed.
    pub fn keep_staging(&mut self, buffer: ember_gpu::GpuBuffer) {
        self.transfers.keep_staging(buffer);
    }

    /// Submit any recorded transfer batch. Returns whether one was
    /// submitted.
    pub fn submit_transfers(&mut self) -> Result<bool> {
        unsafe { self.transfers.submit(&self.gpu) }
    }

    /// Register a callback for the completion of the frame being recorded.
    pub fn on_frame_complete(&mut self, signal: FrameSignal) {
        self.target_mut().on_frame_complete(signal);
    }

    /// Begin a frame on the window target. `None` while rendering is
    /// disabled (minimized window, lost surface).
    pub fn begin_frame(&mut self) -> Result<Option<FrameContext>> {
        let Some(target) = self.target.as_mut() else {
            return Ok(None);
        };
        unsafe { target.begin_frame(&self.gpu) }
    }

    /// Abandon the frame begun by `begin_frame` without presenting.
    pub fn abort_frame(&mut self) -> Result<()> {
        let Some(target) = self.target.as_mut() else {
            return Ok(());
        };
        unsafe { target.abort_frame(&self.gpu) }
    }

    /// Present the frame begun by `begin_frame`.
    pub fn present(&mut self) -> Result<SurfaceStatus> {
        let status = {
            let target = self.target.as_mut().expect("target alive until cleanup");
            unsafe { target.present(&self.gpu) }?
        };
        self.frame_count += 1;
        Ok(status)
    }

    /// React to a window size report.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let Some(target) = self.target.as_mut() else {
            return Ok(());
        };
        unsafe { target.resize(&self.gpu, width, height) }
    }

    /// Tear down engine-owned GPU resources. The context itself is
    /// dropped afterwards.
    pub(crate) fn cleanup(&mut self) -> Result<()> {
        self.gpu.wait_idle()?;
        unsafe {
            self.transfers.destroy(&self.gpu)?;
            if let Some(target) = self.target.take() {
                target.destroy(&self.gpu)?;
            }
        }
        Ok(())
    }
}
