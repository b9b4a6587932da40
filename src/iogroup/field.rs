//! Raw registers and decoded bit fields
//!
//! A raw register yields an integer word; field signals decode a bit range
//! of that word and scale it. Several field signals over the same register
//! share one bulk request through the register's transport.

use crate::error::PlatformError;
use crate::iogroup::object::SignalSource;

/// Integer-valued hardware resource
pub trait RawRegister {
    /// Register with the bulk transport, called once per push
    fn setup_batch(&mut self) -> Result<(), PlatformError>;

    /// Word from the most recent bulk transaction
    fn batch_bits(&mut self) -> Result<u64, PlatformError>;

    /// Immediate read
    fn read_bits(&self) -> Result<u64, PlatformError>;
}

/// Inclusive bit range `[begin, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub begin: u32,
    pub end: u32,
}

impl BitField {
    pub const fn new(begin: u32, end: u32) -> Self {
        Self { begin, end }
    }

    /// Mask of the field in place
    pub fn mask(&self) -> u64 {
        let width = self.end - self.begin + 1;
        let low = if width >= 64 {
            u64::MAX
        } else {
            (1u64 << width) - 1
        };
        low << self.begin
    }

    /// Field value shifted down to bit 0
    pub fn extract(&self, word: u64) -> u64 {
        (word & self.mask()) >> self.begin
    }

    /// `word` with the field replaced by `value`
    pub fn insert(&self, word: u64, value: u64) -> u64 {
        (word & !self.mask()) | ((value << self.begin) & self.mask())
    }
}

/// Whole register exposed as a signal
pub struct RawSignal<R> {
    raw: R,
}

impl<R: RawRegister> RawSignal<R> {
    pub fn new(raw: R) -> Self {
        Self { raw }
    }
}

impl<R: RawRegister> SignalSource for RawSignal<R> {
    fn setup_batch(&mut self) -> Result<(), PlatformError> {
        self.raw.setup_batch()
    }

    fn batch_value(&mut self) -> Result<f64, PlatformError> {
        Ok(self.raw.batch_bits()? as f64)
    }

    fn read(&self) -> Result<f64, PlatformError> {
        Ok(self.raw.read_bits()? as f64)
    }
}

/// Bit field of a register, multiplied by `scale`
pub struct FieldSignal<R> {
    raw: R,
    field: BitField,
    scale: f64,
}

impl<R: RawRegister> FieldSignal<R> {
    pub fn new(raw: R, field: BitField, scale: f64) -> Self {
        Self { raw, field, scale }
    }

    fn decode(&self, word: u64) -> f64 {
        self.field.extract(word) as f64 * self.scale
    }
}

impl<R: RawRegister> SignalSource for FieldSignal<R> {
    fn setup_batch(&mut self) -> Result<(), PlatformError> {
        self.raw.setup_batch()
    }

    fn batch_value(&mut self) -> Result<f64, PlatformError> {
        let word = self.raw.batch_bits()?;
        Ok(self.decode(word))
    }

    fn read(&self) -> Result<f64, PlatformError> {
        let word = self.raw.read_bits()?;
        Ok(self.decode(word))
    }
}
