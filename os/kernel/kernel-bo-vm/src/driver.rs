//! Hooks a GPU driver plugs into the buffer-object VM code.
//!
//! Every hook has a default, so a driver only overrides what its hardware
//! needs. The only hook without a useful default is
//! [`verify_access`](BoDriver::verify_access): a driver that does not
//! implement it cannot have its objects mapped at all.

use crate::access::AccessBuffer;
use crate::addresses::Pfn;
use crate::bo::{BoState, BufferObject};
use crate::error::{AccessError, IoReserveError, MmapError, NotifyError, PopulateError};
use crate::mem::MemRegion;
use crate::tt::{PagePool, TtPages};
use crate::vma::FileContext;

pub trait BoDriver: Send + Sync {
    /// `bo` is reserved and about to be faulted in. The driver may move it
    /// somewhere CPU-visible first.
    ///
    /// # Errors
    /// [`NotifyError::Busy`] / [`NotifyError::Interrupted`] make the access
    /// fault again later; [`NotifyError::Fatal`] is a bus error.
    fn fault_reserve_notify(
        &self,
        _bo: &BufferObject,
        _state: &mut BoState,
    ) -> Result<(), NotifyError> {
        Ok(())
    }

    /// Make sure every backing page of `tt` exists.
    ///
    /// # Errors
    /// [`PopulateError::OutOfMemory`].
    fn populate(&self, tt: &mut TtPages, pool: &dyn PagePool) -> Result<(), PopulateError> {
        tt.populate(pool)
    }

    /// Reserve bus resources so `mem` can be reached by the CPU.
    ///
    /// # Errors
    /// [`IoReserveError::Driver`].
    fn io_mem_reserve(&self, _mem: &mut MemRegion) -> Result<(), IoReserveError> {
        Ok(())
    }

    fn io_mem_free(&self, _mem: &mut MemRegion) {}

    /// Device frame backing page `page_offset` of `bo`.
    fn io_mem_pfn(&self, _bo: &BufferObject, mem: &MemRegion, page_offset: u64) -> Pfn {
        mem.bus.first_pfn() + page_offset
    }

    /// Raw access to memory types the host cannot map page by page.
    ///
    /// # Errors
    /// [`AccessError::Unsupported`] unless overridden.
    fn access_memory(
        &self,
        _bo: &BufferObject,
        _state: &mut BoState,
        _offset: u64,
        _buf: AccessBuffer<'_>,
    ) -> Result<usize, AccessError> {
        Err(AccessError::Unsupported)
    }

    /// May `file` map `bo`?
    ///
    /// # Errors
    /// [`MmapError::PermissionDenied`]; [`MmapError::NoVerifier`] unless
    /// overridden.
    fn verify_access(&self, _bo: &BufferObject, _file: &FileContext) -> Result<(), MmapError> {
        Err(MmapError::NoVerifier)
    }
}
