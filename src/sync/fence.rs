//! Monotonic fence used for CPU-GPU sync.

use anyhow::Result;

use crate::core::device::Device;
use crate::core::handle::FenceHandle;

/// Wrapper around a monotonic device fence. Every call to [`Fence::signal`] schedules the next value
/// on the queue, waiting on that value blocks until all work submitted before it has completed.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Fence<D: Device> {
    #[derivative(Debug = "ignore")]
    device: D,
    handle: FenceHandle,
    value: u64,
}

impl<D: Device> Fence<D> {
    /// Create a new fence starting at `initial_value`.
    pub fn new(device: D, initial_value: u64) -> Result<Self> {
        let handle = device.create_fence(initial_value)?;
        #[cfg(feature = "log-objects")]
        trace!("Created new fence {:?}", handle);
        Ok(Self {
            device,
            handle,
            value: initial_value,
        })
    }

    /// Signal the next fence value from the queue. Returns the signaled value.
    pub fn signal(&mut self) -> Result<u64> {
        let value = self.value + 1;
        self.device.signal(self.handle, value)?;
        self.value = value;
        Ok(value)
    }

    /// Waits for the fence to reach `value` with no timeout. Note that this is a blocking call.
    pub fn wait(&self, value: u64) -> Result<()> {
        self.device.wait(self.handle, value)
    }

    /// Waits for the most recently signaled value.
    pub fn wait_latest(&self) -> Result<()> {
        self.wait(self.value)
    }

    /// The last value that was signaled from the host side.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// The last value the device reached.
    pub fn completed_value(&self) -> Result<u64> {
        self.device.completed_value(self.handle)
    }

    /// Get the raw fence handle
    pub fn handle(&self) -> FenceHandle {
        self.handle
    }
}

impl<D: Device> Drop for Fence<D> {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying fence {:?}", self.handle);
        self.device.destroy_fence(self.handle);
    }
}
