//! Message interface to the pool's owning task.

use std::sync::mpsc;
use std::thread::JoinHandle;

use tracing::debug;
use upres_core::{Error, Result};

use crate::limits::DeviceLimits;

use super::state::{BufferDescriptor, PoolConfig, PoolCore, PoolStats, ScaleBucket, UsageClass};

/// Requests understood by the pool task.
enum PoolRequest {
    Acquire {
        class: UsageClass,
        bucket: ScaleBucket,
        bytes: u64,
        reply: mpsc::Sender<Result<(Vec<f32>, BufferDescriptor)>>,
    },
    Release {
        data: Vec<f32>,
        desc: BufferDescriptor,
    },
    Forget {
        desc: BufferDescriptor,
    },
    Snapshot {
        reply: mpsc::Sender<PoolStats>,
    },
    /// Destroy all pooled buffers and report the resulting stats.
    Drain {
        reply: mpsc::Sender<PoolStats>,
    },
    Shutdown,
}

/// Cloneable handle to the pool task.
///
/// Every pool mutation travels through this handle as a message; the pool
/// itself lives on the [`MemoryManager`] thread.
#[derive(Clone)]
pub struct PoolHandle {
    tx: mpsc::Sender<PoolRequest>,
}

impl PoolHandle {
    /// Acquires a buffer of `bytes` bytes in the given class and bucket.
    ///
    /// Blocks until the pool task replies. Fails with `OutOfBudget` when
    /// the budget cannot be met even after cleanup.
    pub fn acquire(
        &self,
        class: UsageClass,
        bucket: ScaleBucket,
        bytes: u64,
    ) -> Result<PooledBuffer> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(PoolRequest::Acquire {
                class,
                bucket,
                bytes,
                reply,
            })
            .map_err(|_| Error::invariant("memory manager task has stopped"))?;
        let (data, desc) = rx
            .recv()
            .map_err(|_| Error::invariant("memory manager task dropped an acquire reply"))??;
        Ok(PooledBuffer {
            data: Some(data),
            desc,
            home: self.tx.clone(),
        })
    }

    /// Acquires an `Image`-shaped buffer: `width * height * channels`
    /// floats.
    pub fn acquire_image(
        &self,
        class: UsageClass,
        bucket: ScaleBucket,
        width: u32,
        height: u32,
        channels: u8,
    ) -> Result<PooledBuffer> {
        let bytes = width as u64 * height as u64 * channels as u64 * 4;
        self.acquire(class, bucket, bytes)
    }

    /// Returns a point-in-time snapshot of accounting and pressure.
    pub fn snapshot(&self) -> Result<PoolStats> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(PoolRequest::Snapshot { reply })
            .map_err(|_| Error::invariant("memory manager task has stopped"))?;
        rx.recv()
            .map_err(|_| Error::invariant("memory manager task dropped a snapshot reply"))
    }

    /// Destroys every pooled buffer and returns the resulting stats.
    ///
    /// Called at stage boundaries and session end.
    pub fn drain(&self) -> Result<PoolStats> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(PoolRequest::Drain { reply })
            .map_err(|_| Error::invariant("memory manager task has stopped"))?;
        rx.recv()
            .map_err(|_| Error::invariant("memory manager task dropped a drain reply"))
    }
}

/// A buffer exclusively owned by the caller until released.
///
/// Dropping the buffer returns it to the pool automatically; prefer the
/// explicit [`release`](Self::release) at clear ownership boundaries.
#[derive(Debug)]
pub struct PooledBuffer {
    data: Option<Vec<f32>>,
    desc: BufferDescriptor,
    home: mpsc::Sender<PoolRequest>,
}

impl PooledBuffer {
    /// Buffer contents.
    pub fn as_slice(&self) -> &[f32] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Mutable buffer contents.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }

    /// Length in floats.
    pub fn len(&self) -> usize {
        self.data.as_ref().map(Vec::len).unwrap_or(0)
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The buffer's descriptor.
    pub fn descriptor(&self) -> BufferDescriptor {
        self.desc
    }

    /// Returns the buffer to the pool.
    pub fn release(mut self) {
        self.send_home();
    }

    /// Takes the backing storage out of the pool's domain.
    ///
    /// The pool accounts this as a deallocation; the caller now owns the
    /// vector outright. Used for the final output canvas, which outlives
    /// the session's pool.
    pub fn detach(mut self) -> Vec<f32> {
        let data = self.data.take().expect("buffer already consumed");
        let _ = self.home.send(PoolRequest::Forget { desc: self.desc });
        data
    }

    /// Moves the storage into an [`Image`], keeping it accounted.
    ///
    /// The buffer length must match `width * height * channels`. The
    /// returned [`BufferTicket`] returns the storage to the pool via
    /// [`BufferTicket::release`]; if the ticket is dropped instead (an
    /// error path lost the image), the pool forgets the allocation so
    /// accounting stays consistent.
    pub fn into_image(
        mut self,
        width: u32,
        height: u32,
        channels: u8,
    ) -> Result<(upres_core::Image, BufferTicket)> {
        let data = self.data.take().expect("buffer already consumed");
        let desc = self.desc;
        let home = self.home.clone();
        match upres_core::Image::from_data(width, height, channels, data) {
            Ok(image) => Ok((
                image,
                BufferTicket {
                    inner: Some((desc, home)),
                },
            )),
            Err(e) => {
                // Hand the storage back before surfacing the mismatch.
                let _ = home.send(PoolRequest::Forget { desc });
                Err(Error::invariant(format!("pooled buffer misshaped: {e}")))
            }
        }
    }

    fn send_home(&mut self) {
        if let Some(data) = self.data.take() {
            // A dead pool task means the session is tearing down; the
            // buffer is simply dropped.
            let _ = self.home.send(PoolRequest::Release {
                data,
                desc: self.desc,
            });
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.send_home();
    }
}

/// Claim check for storage that left a [`PooledBuffer`] via
/// [`PooledBuffer::into_image`].
pub struct BufferTicket {
    inner: Option<(BufferDescriptor, mpsc::Sender<PoolRequest>)>,
}

impl BufferTicket {
    /// Returns the storage (taken back out of the image) to the pool.
    pub fn release(mut self, data: Vec<f32>) {
        if let Some((desc, home)) = self.inner.take() {
            let _ = home.send(PoolRequest::Release { data, desc });
        }
    }
}

impl Drop for BufferTicket {
    fn drop(&mut self) {
        if let Some((desc, home)) = self.inner.take() {
            let _ = home.send(PoolRequest::Forget { desc });
        }
    }
}

/// Owns the pool thread.
///
/// The thread services [`PoolHandle`] requests and runs the pressure
/// sweep every [`PoolConfig::sweep_period`]. Dropping the manager shuts
/// the thread down; outstanding handles then fail gracefully.
pub struct MemoryManager {
    handle: PoolHandle,
    thread: Option<JoinHandle<()>>,
}

impl MemoryManager {
    /// Spawns the pool task with the given limits and tunables.
    pub fn spawn(limits: DeviceLimits, config: PoolConfig) -> Self {
        let (tx, rx) = mpsc::channel::<PoolRequest>();
        let sweep_period = config.sweep_period;
        let thread = std::thread::Builder::new()
            .name("upres-pool".into())
            .spawn(move || {
                let mut pool = PoolCore::new(limits, config);
                loop {
                    match rx.recv_timeout(sweep_period) {
                        Ok(PoolRequest::Acquire {
                            class,
                            bucket,
                            bytes,
                            reply,
                        }) => {
                            let _ = reply.send(pool.acquire(class, bucket, bytes));
                        }
                        Ok(PoolRequest::Release { data, desc }) => {
                            pool.release(data, desc);
                        }
                        Ok(PoolRequest::Forget { desc }) => {
                            pool.forget(desc);
                        }
                        Ok(PoolRequest::Snapshot { reply }) => {
                            let _ = reply.send(pool.stats());
                        }
                        Ok(PoolRequest::Drain { reply }) => {
                            pool.destroy_all_pooled();
                            let _ = reply.send(pool.stats());
                        }
                        Ok(PoolRequest::Shutdown) => break,
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            pool.sweep();
                        }
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("memory manager task stopped: {:?}", pool);
            })
            .expect("failed to spawn memory manager thread");

        Self {
            handle: PoolHandle { tx },
            thread: Some(thread),
        }
    }

    /// Spawns with default tunables.
    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self::spawn(limits, PoolConfig::default())
    }

    /// A cloneable handle to the pool task.
    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        let _ = self.handle.tx.send(PoolRequest::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(limit: u64) -> MemoryManager {
        MemoryManager::with_limits(DeviceLimits::with_budget(limit))
    }

    #[test]
    fn test_acquire_and_release_through_handle() {
        let mgr = manager(100_000);
        let handle = mgr.handle();

        let buf = handle
            .acquire(UsageClass::Input, ScaleBucket::Generic, 4000)
            .unwrap();
        assert_eq!(buf.len(), 1000);
        assert_eq!(handle.snapshot().unwrap().accounting.in_use, 4000);

        buf.release();
        let stats = handle.snapshot().unwrap();
        assert_eq!(stats.accounting.in_use, 0);
        assert_eq!(stats.accounting.pooled, 4000);
    }

    #[test]
    fn test_drop_returns_buffer() {
        let mgr = manager(100_000);
        let handle = mgr.handle();
        {
            let _buf = handle
                .acquire(UsageClass::Compute, ScaleBucket::Generic, 1024)
                .unwrap();
        }
        let stats = handle.snapshot().unwrap();
        assert_eq!(stats.accounting.in_use, 0);
        assert!(stats.accounting.is_consistent());
    }

    #[test]
    fn test_detach_removes_accounting() {
        let mgr = manager(100_000);
        let handle = mgr.handle();
        let buf = handle
            .acquire(UsageClass::Output, ScaleBucket::Generic, 2048)
            .unwrap();
        let data = buf.detach();
        assert_eq!(data.len(), 512);

        let stats = handle.snapshot().unwrap();
        assert_eq!(stats.accounting.allocated, 0);
        assert_eq!(stats.accounting.deallocations, 1);
    }

    #[test]
    fn test_out_of_budget_surfaces() {
        let mgr = manager(1000);
        let handle = mgr.handle();
        let _held = handle
            .acquire(UsageClass::Input, ScaleBucket::Generic, 800)
            .unwrap();
        let err = handle
            .acquire(UsageClass::Input, ScaleBucket::Generic, 800)
            .unwrap_err();
        assert!(err.is_out_of_budget());
    }

    #[test]
    fn test_drain_empties_pools() {
        let mgr = manager(100_000);
        let handle = mgr.handle();
        handle
            .acquire(UsageClass::Input, ScaleBucket::Generic, 4000)
            .unwrap()
            .release();
        let stats = handle.drain().unwrap();
        assert_eq!(stats.accounting.pooled, 0);
        assert_eq!(stats.idle_buffers, 0);
    }

    #[test]
    fn test_concurrent_workers_share_handle() {
        let mgr = manager(1_000_000);
        let handle = mgr.handle();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let handle = handle.clone();
                scope.spawn(move || {
                    for _ in 0..25 {
                        let buf = handle
                            .acquire(UsageClass::Compute, ScaleBucket::Generic, 4096)
                            .unwrap();
                        buf.release();
                    }
                });
            }
        });

        let stats = handle.snapshot().unwrap();
        assert_eq!(stats.accounting.in_use, 0);
        assert!(stats.accounting.is_consistent());
    }
}
