use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::common::{BurrowError, PageId, Result, PAGE_SIZE};

use super::DiskManager;

type PageBuf = Box<[u8; PAGE_SIZE]>;

/// A disk I/O request handed to the scheduler's worker thread.
/// Completion (and, for reads, the filled buffer) comes back over the
/// per-request channel.
pub enum DiskRequest {
    Read {
        page_id: PageId,
        done: Sender<Result<PageBuf>>,
    },
    Write {
        page_id: PageId,
        data: PageBuf,
        done: Sender<Result<()>>,
    },
}

/// DiskScheduler funnels page I/O through a single background worker thread.
/// The buffer pool uses the synchronous wrappers; `schedule` is available
/// for fire-and-forget use.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_sender: Sender<DiskRequest>,
    shutdown: Arc<AtomicBool>,
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Spawns the worker thread over the given DiskManager.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(128);
        let shutdown = Arc::new(AtomicBool::new(false));

        let dm = Arc::clone(&disk_manager);
        let stop = Arc::clone(&shutdown);
        let worker_handle = thread::spawn(move || Self::run_worker(dm, receiver, stop));

        Self {
            disk_manager,
            request_sender: sender,
            shutdown,
            worker_handle: Some(worker_handle),
        }
    }

    /// Queues a request for the worker.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        self.request_sender
            .send(request)
            .map_err(|e| BurrowError::DiskScheduler(format!("failed to queue request: {}", e)))
    }

    /// Reads a page and waits for the bytes.
    pub fn read_page_sync(&self, page_id: PageId) -> Result<PageBuf> {
        let (tx, rx) = bounded(1);
        self.schedule(DiskRequest::Read { page_id, done: tx })?;
        rx.recv()
            .map_err(|e| BurrowError::DiskScheduler(format!("read completion lost: {}", e)))?
    }

    /// Writes a page and waits for completion.
    pub fn write_page_sync(&self, page_id: PageId, data: PageBuf) -> Result<()> {
        let (tx, rx) = bounded(1);
        self.schedule(DiskRequest::Write {
            page_id,
            data,
            done: tx,
        })?;
        rx.recv()
            .map_err(|e| BurrowError::DiskScheduler(format!("write completion lost: {}", e)))?
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    fn run_worker(
        disk_manager: Arc<DiskManager>,
        receiver: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                // Drain remaining requests before exiting.
                while let Ok(request) = receiver.try_recv() {
                    Self::process(&disk_manager, request);
                }
                break;
            }

            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(request) => Self::process(&disk_manager, request),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn process(disk_manager: &DiskManager, request: DiskRequest) {
        match request {
            DiskRequest::Read { page_id, done } => {
                let mut buf: PageBuf = Box::new([0u8; PAGE_SIZE]);
                let result = disk_manager
                    .read_page(page_id, &mut buf[..])
                    .map(|_| buf);
                let _ = done.send(result);
            }
            DiskRequest::Write {
                page_id,
                data,
                done,
            } => {
                let _ = done.send(disk_manager.write_page(page_id, &data[..]));
            }
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_scheduler_read_write() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        let mut data: Box<[u8; PAGE_SIZE]> = Box::new([0u8; PAGE_SIZE]);
        data[0] = 42;
        data[100] = 255;
        scheduler.write_page_sync(PageId::new(1), data).unwrap();

        let read = scheduler.read_page_sync(PageId::new(1)).unwrap();
        assert_eq!(read[0], 42);
        assert_eq!(read[100], 255);
    }

    #[test]
    fn test_scheduler_many_requests() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        for i in 0..16u32 {
            let mut data: Box<[u8; PAGE_SIZE]> = Box::new([0u8; PAGE_SIZE]);
            data[0] = i as u8;
            scheduler.write_page_sync(PageId::new(i), data).unwrap();
        }

        for i in 0..16u32 {
            let read = scheduler.read_page_sync(PageId::new(i)).unwrap();
            assert_eq!(read[0], i as u8);
        }
    }
}
