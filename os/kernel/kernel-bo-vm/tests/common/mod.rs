#![allow(dead_code)]

use kernel_bo_vm::{
    AccessBuffer, AccessError, AddressSpace, BoDevice, BoDriver, BoState, BufferObject,
    FaultFlags, FaultOutcome, Fence, FenceWaitError, FileContext, FileId, InsertError,
    IoReserveError, MemRegion, MemType, MemTypeManager, MmapError, NotifyError, OffsetIndex,
    PAGE_SIZE, PageFrame, PageProt, PagePool, Pfn, PlacementFlags, PopulateError,
    RegionSnapshot, SystemPagePool, TtFlags, TtPages, VirtualAddress, VirtualMapping, VmFault,
    VmFlags, establish_mapping,
};
use kernel_sync::{Interrupt, TaskId};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once, OnceLock, Weak};

/// Where test mappings start.
pub const MAP_BASE: u64 = 0x7f00_0000_0000;

/// First frame handed out by the fixture's page pool.
pub const POOL_BASE: Pfn = Pfn::new(0x1000);

pub fn page_addr(page: u64) -> VirtualAddress {
    VirtualAddress::new(MAP_BASE + page * PAGE_SIZE as u64)
}

/// Address space that records every installed translation.
#[derive(Default)]
pub struct RecordingSpace {
    installed: Mutex<BTreeMap<u64, (PageFrame, PageProt)>>,
    fail: Mutex<BTreeMap<u64, InsertError>>,
    unlocks: AtomicUsize,
    signal: AtomicBool,
}

impl RecordingSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `insert` at `address` fail with `err`.
    pub fn fail_at(&self, address: VirtualAddress, err: InsertError) {
        self.fail.lock().unwrap().insert(address.as_u64(), err);
    }

    /// Pretend a translation for `address` already exists.
    pub fn premap(&self, address: VirtualAddress, frame: PageFrame) {
        self.installed
            .lock()
            .unwrap()
            .insert(address.as_u64(), (frame, PageProt::new()));
    }

    pub fn installed(&self) -> BTreeMap<u64, (PageFrame, PageProt)> {
        self.installed.lock().unwrap().clone()
    }

    pub fn installed_pages(&self) -> Vec<u64> {
        self.installed
            .lock()
            .unwrap()
            .keys()
            .map(|addr| (addr - MAP_BASE) / PAGE_SIZE as u64)
            .collect()
    }

    pub fn frame_at(&self, page: u64) -> Option<PageFrame> {
        self.installed
            .lock()
            .unwrap()
            .get(&page_addr(page).as_u64())
            .map(|(frame, _)| *frame)
    }

    pub fn prot_at(&self, page: u64) -> Option<PageProt> {
        self.installed
            .lock()
            .unwrap()
            .get(&page_addr(page).as_u64())
            .map(|(_, prot)| *prot)
    }

    pub fn unlocks(&self) -> usize {
        self.unlocks.load(Ordering::SeqCst)
    }

    pub fn set_signal(&self, pending: bool) {
        self.signal.store(pending, Ordering::SeqCst);
    }

    pub fn fault(&self, vma: &VirtualMapping, page: u64, flags: FaultFlags) -> FaultOutcome {
        self.fault_as(TaskId::next(), vma, page, flags)
    }

    pub fn fault_as(
        &self,
        task: TaskId,
        vma: &VirtualMapping,
        page: u64,
        flags: FaultFlags,
    ) -> FaultOutcome {
        vma.fault(&VmFault::new(self, task, page_addr(page), flags))
    }
}

impl AddressSpace for RecordingSpace {
    fn insert(
        &self,
        region: &RegionSnapshot,
        address: VirtualAddress,
        frame: PageFrame,
    ) -> Result<(), InsertError> {
        if let Some(err) = self.fail.lock().unwrap().get(&address.as_u64()) {
            return Err(*err);
        }
        assert!(region.start <= address && address < region.end);

        let mut installed = self.installed.lock().unwrap();
        if installed.contains_key(&address.as_u64()) {
            return Err(InsertError::Busy);
        }
        installed.insert(address.as_u64(), (frame, region.prot));
        Ok(())
    }

    fn mmap_read_unlock(&self) {
        self.unlocks.fetch_add(1, Ordering::SeqCst);
    }

    fn signal_pending(&self) -> bool {
        self.signal.load(Ordering::SeqCst)
    }
}

/// Fence signalled by the test.
#[derive(Default)]
pub struct TestFence {
    signaled: AtomicBool,
    fail: AtomicBool,
    waits: AtomicUsize,
}

impl TestFence {
    pub fn pending() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn signaled() -> Arc<Self> {
        let fence = Self::pending();
        fence.signal();
        fence
    }

    /// A fence whose operation already completed with an error.
    pub fn failing() -> Arc<Self> {
        let fence = Self::pending();
        fence.fail();
        fence
    }

    pub fn signal(&self) {
        self.signaled.store(true, Ordering::SeqCst);
    }

    /// Complete with an error. Still signals.
    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
        self.signal();
    }

    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }
}

impl Fence for TestFence {
    fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::SeqCst)
    }

    fn wait(&self, interrupt: &dyn Interrupt) -> Result<(), FenceWaitError> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        loop {
            if self.fail.load(Ordering::SeqCst) {
                return Err(FenceWaitError::Failed);
            }
            if self.is_signaled() {
                return Ok(());
            }
            if interrupt.pending() {
                return Err(FenceWaitError::Interrupted);
            }
            std::thread::yield_now();
        }
    }
}

/// Driver with switchable failures and call counters.
#[derive(Default)]
pub struct TestDriver {
    notify: Mutex<Option<NotifyError>>,
    pub notify_calls: AtomicUsize,
    pub fail_populate: AtomicBool,
    pub fail_io_reserve: AtomicBool,
    pub io_reserves: AtomicUsize,
    pub io_frees: AtomicUsize,
    /// Tasks currently inside a reservation-protected hook.
    pub inside: AtomicUsize,
    pub vram: Mutex<Vec<u8>>,
    /// Device the driver is attached to, for checks from inside hooks.
    device: OnceLock<Weak<BoDevice>>,
    /// `(hook, I/O lock held)` for every reserve / free call.
    pub io_hooks: Mutex<Vec<(&'static str, bool)>>,
}

impl TestDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            vram: Mutex::new(vec![0; 64 * PAGE_SIZE]),
            ..Self::default()
        })
    }

    pub fn set_notify(&self, result: Option<NotifyError>) {
        *self.notify.lock().unwrap() = result;
    }

    pub fn attach(&self, device: &Arc<BoDevice>) {
        let _ = self.device.set(Arc::downgrade(device));
    }

    fn record_io_hook(&self, hook: &'static str, mem: &MemRegion) {
        let locked = self
            .device
            .get()
            .and_then(Weak::upgrade)
            .is_some_and(|device| device.man(mem.mem_type).is_io_locked());
        self.io_hooks.lock().unwrap().push((hook, locked));
    }

    fn exclusive(&self) {
        assert_eq!(self.inside.fetch_add(1, Ordering::SeqCst), 0, "reservation not exclusive");
        std::thread::yield_now();
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BoDriver for TestDriver {
    fn fault_reserve_notify(
        &self,
        _bo: &BufferObject,
        _state: &mut BoState,
    ) -> Result<(), NotifyError> {
        self.notify_calls.fetch_add(1, Ordering::SeqCst);
        self.exclusive();
        self.notify.lock().unwrap().map_or(Ok(()), Err)
    }

    fn populate(&self, tt: &mut TtPages, pool: &dyn PagePool) -> Result<(), PopulateError> {
        if self.fail_populate.load(Ordering::SeqCst) {
            return Err(PopulateError::OutOfMemory);
        }
        tt.populate(pool)
    }

    fn io_mem_reserve(&self, mem: &mut MemRegion) -> Result<(), IoReserveError> {
        self.record_io_hook("reserve", mem);
        if self.fail_io_reserve.load(Ordering::SeqCst) {
            return Err(IoReserveError::Driver);
        }
        self.io_reserves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn io_mem_free(&self, mem: &mut MemRegion) {
        self.record_io_hook("free", mem);
        self.io_frees.fetch_add(1, Ordering::SeqCst);
    }

    fn access_memory(
        &self,
        _bo: &BufferObject,
        state: &mut BoState,
        offset: u64,
        buf: AccessBuffer<'_>,
    ) -> Result<usize, AccessError> {
        if state.mem.mem_type != MemType::Vram {
            return Err(AccessError::Unsupported);
        }
        self.exclusive();

        let start = (state.mem.bus.offset + offset) as usize;
        let mut vram = self.vram.lock().unwrap();
        match buf {
            AccessBuffer::Read(dst) => {
                dst.copy_from_slice(&vram[start..start + dst.len()]);
                Ok(dst.len())
            }
            AccessBuffer::Write(src) => {
                vram[start..start + src.len()].copy_from_slice(src);
                Ok(src.len())
            }
        }
    }

    fn verify_access(&self, bo: &BufferObject, file: &FileContext) -> Result<(), MmapError> {
        if bo.verify_node_access(file.file) {
            Ok(())
        } else {
            Err(MmapError::PermissionDenied)
        }
    }
}

/// Driver that overrides nothing.
pub struct PlainDriver;

impl BoDriver for PlainDriver {}

/// A device with a test driver, a page pool and one open file.
pub struct Fixture {
    pub device: Arc<BoDevice>,
    pub driver: Arc<TestDriver>,
    pub pool: Arc<SystemPagePool>,
    pub file: FileContext,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(SystemPagePool::new(POOL_BASE), false)
    }

    /// Page pool that runs dry after `limit` pages.
    pub fn with_pool_limit(limit: usize) -> Self {
        Self::build(SystemPagePool::with_limit(POOL_BASE, limit), false)
    }

    /// Every memory type reserves I/O space without the I/O lock.
    pub fn with_fastpath() -> Self {
        Self::build(SystemPagePool::new(POOL_BASE), true)
    }

    fn build(pool: SystemPagePool, fastpath: bool) -> Self {
        init_logging();
        let driver = TestDriver::new();
        let pool = Arc::new(pool);
        let device = BoDevice::with_managers(
            driver.clone(),
            pool.clone(),
            OffsetIndex::default(),
            std::array::from_fn(|_| MemTypeManager::new(fastpath)),
        );
        driver.attach(&device);
        let file = FileContext {
            file: FileId(1),
            mapping: device.dev_mapping(),
        };
        Self {
            device,
            driver,
            pool,
            file,
        }
    }

    /// Unpopulated system-memory buffer.
    pub fn host_bo(&self, pages: usize) -> Arc<BufferObject> {
        self.host_bo_in(MemType::System, pages)
    }

    pub fn host_bo_in(&self, mem_type: MemType, pages: usize) -> Arc<BufferObject> {
        self.device
            .create_bo(
                pages,
                MemRegion::host(mem_type, PlacementFlags::cached_placement()),
                Some(TtPages::new(pages, TtFlags::new())),
            )
            .unwrap()
    }

    /// System-memory buffer with every backing page allocated.
    pub fn populated_bo(&self, pages: usize) -> Arc<BufferObject> {
        let bo = self.host_bo(pages);
        {
            let mut state = bo.resv().try_reserve(TaskId::next()).unwrap();
            state.ttm.as_mut().unwrap().populate(&*self.pool).unwrap();
        }
        bo
    }

    /// Write-combined VRAM buffer at bus address `base`.
    pub fn vram_bo(&self, pages: usize, base: u64) -> Arc<BufferObject> {
        self.device
            .create_bo(
                pages,
                MemRegion::iomem(
                    MemType::Vram,
                    PlacementFlags::write_combined_placement(),
                    base,
                    0,
                    (pages * PAGE_SIZE) as u64,
                ),
                None,
            )
            .unwrap()
    }

    /// An unbound mapping of `pages` pages at the start of `bo`.
    pub fn vma(&self, bo: &BufferObject, pages: u64) -> VirtualMapping {
        VirtualMapping::new(
            VirtualAddress::new(MAP_BASE),
            page_addr(pages),
            bo.vma_node_start(),
            VmFlags::shared_rw(),
            self.file.mapping,
        )
    }

    /// Map all of `bo` through the fixture's file.
    pub fn map(&self, bo: &BufferObject) -> VirtualMapping {
        bo.allow(self.file.file);
        let mut vma = self.vma(bo, bo.num_pages() as u64);
        establish_mapping(&self.file, &mut vma, &self.device).unwrap();
        vma
    }

    /// Set a moving fence on `bo`.
    pub fn set_moving(&self, bo: &BufferObject, fence: Arc<TestFence>) {
        bo.resv()
            .try_reserve(TaskId::next())
            .unwrap()
            .set_moving(fence);
    }

    pub fn has_moving(&self, bo: &BufferObject) -> bool {
        bo.resv()
            .try_reserve(TaskId::next())
            .unwrap()
            .moving
            .is_some()
    }
}

/// `log` sink keeping every record for inspection.
pub struct CaptureLogger {
    records: Mutex<Vec<(Level, String)>>,
}

static LOGGER: CaptureLogger = CaptureLogger {
    records: Mutex::new(Vec::new()),
};

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        self.records
            .lock()
            .unwrap()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        log::set_logger(&LOGGER).unwrap();
        log::set_max_level(LevelFilter::Trace);
    });
}

/// Whether a record at `level` containing `needle` was logged.
pub fn logged(level: Level, needle: &str) -> bool {
    LOGGER
        .records
        .lock()
        .unwrap()
        .iter()
        .any(|(l, msg)| *l == level && msg.contains(needle))
}
