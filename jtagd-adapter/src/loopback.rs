//! # Loopback Backend
//!
//! A simulated adapter with TDI looped straight back to TDO. It models the
//! full IEEE 1149.1 TAP state machine, keeps honest performance counters
//! and runs split scans through a real deferred queue, so the layers above
//! it (dispatcher, wire protocol, remote proxy) can be exercised without
//! hardware on the bench.
//!
//! ## Example Usage
//!
//! ```
//! use jtagd_adapter::{Adapter, JtagInterface, loopback::LoopbackAdapter};
//!
//! let mut adapter = LoopbackAdapter::new().with_gpio_pins(4);
//! let jtag = adapter.jtag().expect("loopback always has JTAG");
//! jtag.reset_to_idle().unwrap();
//! ```
//!
//! Scans are only accepted in Shift-IR/Shift-DR, like a real cable: drive
//! the TAP there first or the shift fails with a hardware fault.

use crate::queue::{DeferredOp, DeferredQueue};
use crate::tap::TapState;
use crate::{Adapter, AdapterError, GpioInterface, JtagInterface};

// TMS walks for each navigation helper, one bit per TCK cycle.
const TMS_TEST_LOGIC_RESET: &[bool] = &[true, true, true, true, true];
const TMS_RESET_TO_IDLE: &[bool] = &[true, true, true, true, true, false];
const TMS_ENTER_SHIFT_IR: &[bool] = &[true, true, false, false];
const TMS_ENTER_SHIFT_DR: &[bool] = &[true, false, false];
const TMS_LEAVE_EXIT1: &[bool] = &[true, false];

/// Simulated debug adapter; TDO mirrors TDI.
///
/// By default the adapter exposes JTAG only, supports split scans and has
/// no GPIO bank; the `with_*` builders reshape it for tests and demos.
pub struct LoopbackAdapter {
    name: String,
    serial: String,
    user_id: String,
    frequency: u32,

    jtag_enabled: bool,
    swd_enabled: bool,
    split_supported: bool,

    tap: TapState,
    queue: DeferredQueue,

    shift_ops: u64,
    data_bits: u64,
    mode_bits: u64,
    dummy_clocks: u64,
    recoverable_errors: u64,

    /// Host-side cached pin view: (value, is_output) per pin.
    cached_pins: Vec<(bool, bool)>,
    /// Simulated hardware pin state.
    hw_pins: Vec<(bool, bool)>,
}

impl LoopbackAdapter {
    pub fn new() -> LoopbackAdapter {
        LoopbackAdapter {
            name: "JTAG loopback simulator".to_string(),
            serial: "SIM0000".to_string(),
            user_id: String::new(),
            frequency: 10_000_000,
            jtag_enabled: true,
            swd_enabled: false,
            split_supported: true,
            tap: TapState::TestLogicReset,
            queue: DeferredQueue::new(),
            shift_ops: 0,
            data_bits: 0,
            mode_bits: 0,
            dummy_clocks: 0,
            recoverable_errors: 0,
            cached_pins: Vec::new(),
            hw_pins: Vec::new(),
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = serial.into();
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_frequency(mut self, hz: u32) -> Self {
        self.frequency = hz;
        self
    }

    /// Attaches a GPIO bank of `count` pins, all inputs reading low.
    pub fn with_gpio_pins(mut self, count: usize) -> Self {
        self.cached_pins = vec![(false, false); count];
        self.hw_pins = vec![(false, false); count];
        self
    }

    /// Removes the JTAG capability (an SWD- or GPIO-only adapter).
    pub fn without_jtag(mut self) -> Self {
        self.jtag_enabled = false;
        self
    }

    /// Adds the SWD transport capability.
    pub fn with_swd(mut self) -> Self {
        self.swd_enabled = true;
        self
    }

    /// Disables split-scan support; write-only scans then execute
    /// synchronously and report that they did not defer.
    pub fn without_split(mut self) -> Self {
        self.split_supported = false;
        self
    }

    /// Current TAP controller state of the model.
    pub fn tap_state(&self) -> TapState {
        self.tap
    }

    /// Primitives queued and not yet committed.
    pub fn pending_ops(&self) -> usize {
        self.queue.pending_len()
    }

    /// Anything a synchronous operation must order itself behind gets
    /// flushed first.
    fn flush_pending(&mut self) {
        if self.queue.has_pending() {
            log::debug!(
                "implicit flush of {} deferred operation(s)",
                self.queue.pending_len()
            );
            self.queue.commit();
        }
    }

    fn walk_tms(&mut self, sequence: &[bool]) {
        self.flush_pending();
        self.tap = self.tap.walk(sequence);
        self.mode_bits += sequence.len() as u64;
        log::trace!("TAP now {:?}", self.tap);
    }

    /// Clocks `nbits` through the echo chain and returns the captured TDO.
    ///
    /// Updates the TAP model and the counters; tail bits beyond `nbits` in
    /// the last byte come back zeroed.
    fn clock_shift(
        &mut self,
        last_tms: bool,
        tx: &[u8],
        nbits: u32,
    ) -> Result<Box<[u8]>, AdapterError> {
        let nbytes = nbits.div_ceil(8) as usize;
        if tx.len() < nbytes {
            log::error!(
                "TDI buffer too small: need {} bytes for {} bits, got {}",
                nbytes,
                nbits,
                tx.len()
            );
            return Err(AdapterError::Hardware(format!(
                "TDI buffer holds {} bytes, {} bits need {}",
                tx.len(),
                nbits,
                nbytes
            )));
        }
        if nbits == 0 {
            return Ok(Box::default());
        }
        if !self.tap.is_shift() {
            return Err(AdapterError::Hardware(format!(
                "shift issued in TAP state {:?}",
                self.tap
            )));
        }

        let mut tdo: Box<[u8]> = tx[..nbytes].into();
        let tail = nbits % 8;
        if tail != 0 {
            tdo[nbytes - 1] &= (1u8 << tail) - 1;
        }
        log::trace!("loopback shift: nbits={}, tdo={:02x?}", nbits, &tdo[..]);

        self.shift_ops += 1;
        self.data_bits += nbits as u64;
        if last_tms {
            self.tap = self.tap.advance(true);
        }
        Ok(tdo)
    }
}

impl Default for LoopbackAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Adapter for LoopbackAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn frequency(&self) -> u32 {
        self.frequency
    }

    fn commit(&mut self) -> Result<(), AdapterError> {
        log::debug!(
            "commit: flushing {} deferred operation(s)",
            self.queue.pending_len()
        );
        self.queue.commit();
        Ok(())
    }

    fn jtag(&mut self) -> Option<&mut dyn JtagInterface> {
        if self.jtag_enabled {
            Some(self)
        } else {
            None
        }
    }

    fn supports_swd(&self) -> bool {
        self.swd_enabled
    }

    fn gpio(&mut self) -> Option<&mut dyn GpioInterface> {
        if self.cached_pins.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl JtagInterface for LoopbackAdapter {
    fn test_logic_reset(&mut self) -> Result<(), AdapterError> {
        self.walk_tms(TMS_TEST_LOGIC_RESET);
        Ok(())
    }

    fn enter_shift_ir(&mut self) -> Result<(), AdapterError> {
        self.walk_tms(TMS_ENTER_SHIFT_IR);
        Ok(())
    }

    fn leave_exit1_ir(&mut self) -> Result<(), AdapterError> {
        self.walk_tms(TMS_LEAVE_EXIT1);
        Ok(())
    }

    fn enter_shift_dr(&mut self) -> Result<(), AdapterError> {
        self.walk_tms(TMS_ENTER_SHIFT_DR);
        Ok(())
    }

    fn leave_exit1_dr(&mut self) -> Result<(), AdapterError> {
        self.walk_tms(TMS_LEAVE_EXIT1);
        Ok(())
    }

    fn reset_to_idle(&mut self) -> Result<(), AdapterError> {
        self.walk_tms(TMS_RESET_TO_IDLE);
        Ok(())
    }

    fn shift_data(
        &mut self,
        last_tms: bool,
        tx: &[u8],
        rx: Option<&mut [u8]>,
        nbits: u32,
    ) -> Result<(), AdapterError> {
        self.flush_pending();
        let tdo = self.clock_shift(last_tms, tx, nbits)?;
        if let Some(rx) = rx {
            if rx.len() < tdo.len() {
                return Err(AdapterError::Hardware(format!(
                    "TDO buffer holds {} bytes, {} bits need {}",
                    rx.len(),
                    nbits,
                    tdo.len()
                )));
            }
            rx[..tdo.len()].copy_from_slice(&tdo);
        }
        Ok(())
    }

    fn shift_data_write_only(
        &mut self,
        last_tms: bool,
        tx: &[u8],
        rx: Option<&mut [u8]>,
        nbits: u32,
    ) -> Result<bool, AdapterError> {
        if !self.split_supported {
            self.shift_data(last_tms, tx, rx, nbits)?;
            return Ok(false);
        }

        // Deferred: the model runs now (the simulation is the hardware),
        // but the captured data only becomes collectable after a commit.
        let tdo = self.clock_shift(last_tms, tx, nbits)?;
        self.queue.push(DeferredOp::Shift {
            nbits,
            read_back: rx.map(|_| tdo),
        });
        Ok(true)
    }

    fn shift_data_read_only(&mut self, rx: &mut [u8], nbits: u32) -> Result<bool, AdapterError> {
        // A demanded read forces out whatever is still queued.
        self.flush_pending();

        let nbytes = nbits.div_ceil(8) as usize;
        match self.queue.pop_read() {
            Some(data) => {
                if data.len() != nbytes || rx.len() < nbytes {
                    return Err(AdapterError::Hardware(format!(
                        "deferred read is {} bytes, caller expected {}",
                        data.len(),
                        nbytes
                    )));
                }
                rx[..nbytes].copy_from_slice(&data);
                Ok(true)
            }
            None => Err(AdapterError::Hardware(
                "no deferred read is pending".to_string(),
            )),
        }
    }

    fn send_dummy_clocks(&mut self, nbits: u32) -> Result<(), AdapterError> {
        self.flush_pending();
        self.dummy_clocks += nbits as u64;
        // TMS held low reaches a self-looping state within a few clocks, so
        // the walk is capped instead of iterated nbits times.
        for _ in 0..nbits.min(8) {
            self.tap = self.tap.advance(false);
        }
        Ok(())
    }

    fn send_dummy_clocks_deferred(&mut self, nbits: u32) -> Result<(), AdapterError> {
        self.dummy_clocks += nbits as u64;
        for _ in 0..nbits.min(8) {
            self.tap = self.tap.advance(false);
        }
        self.queue.push(DeferredOp::DummyClocks { nbits });
        Ok(())
    }

    fn is_split_scan_supported(&self) -> bool {
        self.split_supported
    }

    fn shift_op_count(&mut self) -> Result<u64, AdapterError> {
        Ok(self.shift_ops)
    }

    fn data_bit_count(&mut self) -> Result<u64, AdapterError> {
        Ok(self.data_bits)
    }

    fn mode_bit_count(&mut self) -> Result<u64, AdapterError> {
        Ok(self.mode_bits)
    }

    fn dummy_clock_count(&mut self) -> Result<u64, AdapterError> {
        Ok(self.dummy_clocks)
    }

    fn recoverable_error_count(&mut self) -> Result<u64, AdapterError> {
        Ok(self.recoverable_errors)
    }
}

impl GpioInterface for LoopbackAdapter {
    fn gpio_count(&self) -> usize {
        self.cached_pins.len()
    }

    fn read_gpio_state(&mut self) -> Result<(), AdapterError> {
        self.cached_pins.copy_from_slice(&self.hw_pins);
        Ok(())
    }

    fn write_gpio_state(&mut self) -> Result<(), AdapterError> {
        self.hw_pins.copy_from_slice(&self.cached_pins);
        log::debug!("GPIO bank written: {:?}", self.hw_pins);
        Ok(())
    }

    fn value_cached(&self, index: usize) -> bool {
        self.cached_pins.get(index).map(|p| p.0).unwrap_or(false)
    }

    fn direction(&self, index: usize) -> bool {
        self.cached_pins.get(index).map(|p| p.1).unwrap_or(false)
    }

    fn set_value_deferred(&mut self, index: usize, value: bool) {
        if let Some(pin) = self.cached_pins.get_mut(index) {
            pin.0 = value;
        }
    }

    fn set_direction_deferred(&mut self, index: usize, is_output: bool) {
        if let Some(pin) = self.cached_pins.get_mut(index) {
            pin.1 = is_output;
        }
    }
}
