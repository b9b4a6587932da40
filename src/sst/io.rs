//! Speed Select transport abstraction and batch collector
//!
//! Requests are either mailbox commands or MMIO register reads addressed
//! through a logical CPU. [`SstBatch`] collects the distinct requests pushed
//! by field signals and services all of them with one `read_many` call.

use crate::error::{HardwareError, PlatformError};
use crate::iogroup::field::RawRegister;
use crate::iogroup::registry::BatchTransport;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// One readable Speed Select resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SstRequest {
    /// Mailbox read: `request_data` selects level/bucket
    Mbox {
        cpu: usize,
        command: u16,
        subcommand: u16,
        request_data: u32,
    },
    /// 32-bit MMIO register of the power unit
    Mmio { cpu: usize, offset: u32 },
}

impl fmt::Display for SstRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SstRequest::Mbox {
                cpu,
                command,
                subcommand,
                request_data,
            } => write!(
                f,
                "mbox cpu {} cmd {:#x} sub {:#x} data {:#x}",
                cpu, command, subcommand, request_data
            ),
            SstRequest::Mmio { cpu, offset } => write!(f, "mmio cpu {} offset {:#x}", cpu, offset),
        }
    }
}

/// Raw access to the Speed Select interface
pub trait SstIo {
    /// Power-unit core id of a logical CPU
    fn punit_core(&self, cpu: usize) -> Result<u32, HardwareError>;

    /// Read every request, returning values in request order
    fn read_many(&self, requests: &[SstRequest]) -> Result<Vec<u32>, HardwareError>;

    /// Issue a mailbox write
    fn write_mbox(
        &self,
        cpu: usize,
        command: u16,
        subcommand: u16,
        parameter: u32,
        data: u32,
    ) -> Result<(), HardwareError>;

    /// Write an MMIO register
    fn write_mmio(&self, cpu: usize, offset: u32, value: u32) -> Result<(), HardwareError>;
}

/// Deduplicated request list plus the values of the last batch
pub struct SstBatch {
    io: Rc<dyn SstIo>,
    requests: RefCell<Vec<SstRequest>>,
    values: RefCell<Option<Vec<u32>>>,
}

impl SstBatch {
    pub fn new(io: Rc<dyn SstIo>) -> Self {
        Self {
            io,
            requests: RefCell::new(Vec::new()),
            values: RefCell::new(None),
        }
    }

    pub fn io(&self) -> &Rc<dyn SstIo> {
        &self.io
    }

    /// Add a request, returning the slot of an identical earlier one if any
    pub fn add(&self, request: SstRequest) -> usize {
        let mut requests = self.requests.borrow_mut();
        match requests.iter().position(|r| *r == request) {
            Some(slot) => slot,
            None => {
                requests.push(request);
                requests.len() - 1
            }
        }
    }

    pub fn num_requests(&self) -> usize {
        self.requests.borrow().len()
    }

    /// Value of `slot` from the last batch
    pub fn sample(&self, slot: usize) -> Result<u32, PlatformError> {
        let values = self.values.borrow();
        let values = values.as_ref().ok_or(PlatformError::SampleBeforeRead)?;
        values
            .get(slot)
            .copied()
            .ok_or(PlatformError::BatchIndexOutOfRange(slot))
    }

    /// Read one request outside the batch
    pub fn read_once(&self, request: SstRequest) -> Result<u32, HardwareError> {
        let values = self.io.read_many(&[request])?;
        values.first().copied().ok_or_else(|| {
            HardwareError::Unknown(format!("empty response to {}", request))
        })
    }
}

impl BatchTransport for SstBatch {
    fn read_batch(&self) -> Result<(), PlatformError> {
        let requests = self.requests.borrow();
        if requests.is_empty() {
            return Ok(());
        }
        let values = self.io.read_many(&requests)?;
        if values.len() != requests.len() {
            return Err(PlatformError::Consistency(format!(
                "SST batch returned {} values for {} requests",
                values.len(),
                requests.len()
            )));
        }
        log::debug!("SST batch: {} requests", requests.len());
        *self.values.borrow_mut() = Some(values);
        Ok(())
    }
}

/// Registry transport handle sharing one batch
pub struct SharedBatch(pub Rc<SstBatch>);

impl BatchTransport for SharedBatch {
    fn read_batch(&self) -> Result<(), PlatformError> {
        self.0.read_batch()
    }
}

/// One request seen as a raw register
pub struct SstRegister {
    batch: Rc<SstBatch>,
    request: SstRequest,
    slot: Option<usize>,
}

impl SstRegister {
    pub fn new(batch: Rc<SstBatch>, request: SstRequest) -> Self {
        Self {
            batch,
            request,
            slot: None,
        }
    }
}

impl RawRegister for SstRegister {
    fn setup_batch(&mut self) -> Result<(), PlatformError> {
        if self.slot.is_none() {
            self.slot = Some(self.batch.add(self.request));
        }
        Ok(())
    }

    fn batch_bits(&mut self) -> Result<u64, PlatformError> {
        let slot = self.slot.ok_or(PlatformError::SampleBeforeRead)?;
        Ok(u64::from(self.batch.sample(slot)?))
    }

    fn read_bits(&self) -> Result<u64, PlatformError> {
        Ok(u64::from(self.batch.read_once(self.request)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FakeSstIo;

    fn mbox(cpu: usize, request_data: u32) -> SstRequest {
        SstRequest::Mbox {
            cpu,
            command: 0x7f,
            subcommand: 0x10,
            request_data,
        }
    }

    #[test]
    fn test_batch_dedups_requests() {
        let io = Rc::new(FakeSstIo::new());
        let batch = SstBatch::new(io.clone());
        assert_eq!(batch.add(mbox(0, 0x0)), 0);
        assert_eq!(batch.add(mbox(0, 0x100)), 1);
        assert_eq!(batch.add(mbox(0, 0x0)), 0);
        assert_eq!(batch.add(SstRequest::Mmio { cpu: 0, offset: 0x8 }), 2);
        assert_eq!(batch.num_requests(), 3);
    }

    #[test]
    fn test_one_transaction_per_batch() {
        let io = Rc::new(FakeSstIo::new());
        io.set(mbox(0, 0x0), 0x0403_0201);
        io.set(mbox(0, 0x100), 0x0807_0605);
        let batch = Rc::new(SstBatch::new(io.clone()));

        let mut a = SstRegister::new(batch.clone(), mbox(0, 0x0));
        let mut b = SstRegister::new(batch.clone(), mbox(0, 0x0));
        let mut c = SstRegister::new(batch.clone(), mbox(0, 0x100));
        for reg in [&mut a, &mut b, &mut c] {
            reg.setup_batch().unwrap();
        }
        assert!(matches!(a.batch_bits(), Err(PlatformError::SampleBeforeRead)));

        SharedBatch(batch.clone()).read_batch().unwrap();
        assert_eq!(io.read_calls(), 1);
        assert_eq!(a.batch_bits().unwrap(), 0x0403_0201);
        assert_eq!(b.batch_bits().unwrap(), 0x0403_0201);
        assert_eq!(c.batch_bits().unwrap(), 0x0807_0605);
    }

    #[test]
    fn test_read_once_bypasses_batch() {
        let io = Rc::new(FakeSstIo::new());
        io.set(SstRequest::Mmio { cpu: 1, offset: 0x20 }, 0x2_0000);
        let batch = Rc::new(SstBatch::new(io.clone()));
        let reg = SstRegister::new(batch.clone(), SstRequest::Mmio { cpu: 1, offset: 0x20 });
        assert_eq!(reg.read_bits().unwrap(), 0x2_0000);
        assert_eq!(batch.num_requests(), 0);
    }
}
