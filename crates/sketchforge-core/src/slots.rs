//! Build slot pool.
//!
//! Exactly N slots exist for the process lifetime, each a persistent working
//! directory with its own source tree and a base build configuration
//! pre-templated with every supported board. A counting semaphore caps
//! concurrency at N and the free list is mutex-guarded so two acquirers can
//! never see the same free slot. Slots are reused indefinitely; their
//! directories are overwritten between jobs, never recreated.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::boards;
use crate::error::Result;

/// One reusable, exclusively-held build workspace.
#[derive(Debug, Clone)]
pub struct BuildSlot {
    pub id: usize,
    pub dir: PathBuf,
}

impl BuildSlot {
    /// Where the job's sketch source is written.
    pub fn source_path(&self) -> PathBuf {
        self.dir.join("src").join("main.cpp")
    }

    /// The per-job build configuration.
    pub fn config_path(&self) -> PathBuf {
        self.dir.join("platformio.ini")
    }

    /// The pre-templated board sections written once at provisioning.
    pub fn base_config_path(&self) -> PathBuf {
        self.dir.join("platformio.base.ini")
    }

    /// Where the toolchain leaves firmware images for the job env.
    pub fn firmware_dir(&self) -> PathBuf {
        self.dir.join(".pio").join("build").join("build")
    }
}

/// Fixed-size pool of build slots.
pub struct SlotPool {
    slots: Vec<BuildSlot>,
    free: Arc<Mutex<Vec<usize>>>,
    semaphore: Arc<Semaphore>,
}

impl SlotPool {
    /// Pre-provision `capacity` slots under `root`. Existing slot
    /// directories from a previous run are reused as-is; the base config is
    /// rewritten in case the board set changed.
    pub async fn provision(root: PathBuf, capacity: usize) -> Result<Self> {
        assert!(capacity > 0, "slot pool capacity must be non-zero");

        let base_config = format!(
            "[env]\nframework = arduino\n{}",
            boards::board_env_sections()
        );

        let mut slots = Vec::with_capacity(capacity);
        for id in 0..capacity {
            let dir = root.join(format!("slot-{id}"));
            tokio::fs::create_dir_all(dir.join("src")).await?;
            let slot = BuildSlot { id, dir };
            tokio::fs::write(slot.base_config_path(), &base_config).await?;
            slots.push(slot);
        }

        tracing::info!("provisioned {capacity} build slots under {}", root.display());

        Ok(Self {
            free: Arc::new(Mutex::new((0..capacity).rev().collect())),
            semaphore: Arc::new(Semaphore::new(capacity)),
            slots,
        })
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Acquire a slot, suspending until one is free. Waiters are served in
    /// arrival order. The returned guard releases the slot on drop, so every
    /// exit path of a job gives the slot back.
    pub async fn acquire(&self) -> SlotGuard {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("slot semaphore closed");

        // A permit guarantees a free entry; the mutex makes the listing and
        // removal atomic with respect to concurrent acquirers.
        let id = self
            .free
            .lock()
            .expect("slot free list poisoned")
            .pop()
            .expect("slot permit held but free list empty");

        SlotGuard {
            slot: self.slots[id].clone(),
            free: Arc::clone(&self.free),
            _permit: permit,
        }
    }
}

/// Exclusive hold on one slot for the duration of a job.
pub struct SlotGuard {
    slot: BuildSlot,
    free: Arc<Mutex<Vec<usize>>>,
    _permit: OwnedSemaphorePermit,
}

impl std::ops::Deref for SlotGuard {
    type Target = BuildSlot;

    fn deref(&self) -> &BuildSlot {
        &self.slot
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.free
            .lock()
            .expect("slot free list poisoned")
            .push(self.slot.id);
        // The permit drops after this, waking the oldest waiter.
    }
}
