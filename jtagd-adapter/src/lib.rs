//! # jtagd Adapter Contract
//!
//! The contract a debug adapter backend must satisfy to sit behind the
//! `jtagd` daemon, plus a simulated backend for development and testing.
//!
//! ## Capability model
//!
//! An adapter always carries metadata (name, serial, user id, clock
//! frequency) and a commit point for its deferred operation queue. On top of
//! that it may expose up to three orthogonal capabilities:
//!
//! - **JTAG**: TAP state transitions, full-duplex and split scans, dummy
//!   clocks, performance counters ([`JtagInterface`])
//! - **SWD**: transport presence only; the wire vocabulary defines no
//!   SWD-specific operations yet ([`Adapter::supports_swd`])
//! - **GPIO**: an auxiliary pin bank with cached reads and deferred writes
//!   ([`GpioInterface`])
//!
//! Capabilities are queried, not downcast: [`Adapter::jtag`] and
//! [`Adapter::gpio`] return `Option<&mut dyn _>`, set once by the backend,
//! and the session layer tests presence instead of type identity. A single
//! backend may expose any combination.
//!
//! ## Deferred operations
//!
//! The performance-critical path is batching: `shift_data_write_only`,
//! `send_dummy_clocks_deferred` and the per-pin GPIO setters may queue work
//! instead of executing it. [`Adapter::commit`] flushes the queue in
//! submission order and blocks until the hardware has accepted everything.
//! The read half of a deferred write is collected with
//! `shift_data_read_only`, which forces a flush if one is still pending.
//!
//! ## Bit ordering
//!
//! Scan vectors shift LSB-first within each byte. A scan of `n` bits where
//! `n % 8 != 0` uses the *low* `n % 8` bits of the final byte; backends zero
//! the undefined high bits of captured data.
//!
//! ## Implementing a backend
//!
//! ```ignore
//! use jtagd_adapter::{Adapter, AdapterError, JtagInterface};
//!
//! struct MyProbe { /* device handle */ }
//!
//! impl Adapter for MyProbe {
//!     fn name(&self) -> &str { "my-probe" }
//!     fn serial(&self) -> &str { "A1B2C3" }
//!     fn user_id(&self) -> &str { "" }
//!     fn frequency(&self) -> u32 { 10_000_000 }
//!     fn commit(&mut self) -> Result<(), AdapterError> { Ok(()) }
//!     fn jtag(&mut self) -> Option<&mut dyn JtagInterface> { Some(self) }
//! }
//! ```
//!
//! The [`loopback::LoopbackAdapter`] in this crate is a complete example: it
//! models the IEEE 1149.1 state machine, echoes TDI to TDO and keeps honest
//! counters, which makes it the reference backend for the protocol test
//! suites.

pub mod loopback;
pub mod queue;
pub mod tap;

use thiserror::Error;

/// Errors surfaced by adapter backends.
///
/// The session layer treats any of these as fatal for the session that
/// triggered them; the adapter itself stays usable for the next session
/// unless the backend says otherwise.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The transport to the adapter failed (USB gone, socket closed, ...).
    #[error("adapter I/O: {0}")]
    Io(#[from] std::io::Error),
    /// The operation is not implemented by this backend.
    #[error("{0} is not supported by this adapter")]
    Unsupported(&'static str),
    /// The adapter rejected or failed the operation.
    #[error("hardware fault: {0}")]
    Hardware(String),
    /// A remote backend answered with something other than the expected
    /// reply.
    #[error("remote protocol fault: {0}")]
    Protocol(String),
}

/// Common contract every adapter backend satisfies.
///
/// Metadata getters are cheap and infallible; backends that must ask the
/// hardware cache the answers at open time.
pub trait Adapter: Send {
    /// Human-readable adapter model name.
    fn name(&self) -> &str;

    /// Serial number, unique per physical adapter.
    fn serial(&self) -> &str;

    /// Free-form user-assigned identifier, empty when unset.
    fn user_id(&self) -> &str;

    /// TCK frequency in Hz.
    fn frequency(&self) -> u32;

    /// Flushes the deferred operation queue, blocking until the hardware
    /// has accepted every queued primitive.
    ///
    /// If any queued primitive fails the commit fails, and the results of
    /// primitives queued after the failing one are undefined.
    fn commit(&mut self) -> Result<(), AdapterError>;

    /// The JTAG capability, if this adapter has one.
    fn jtag(&mut self) -> Option<&mut dyn JtagInterface> {
        None
    }

    /// Whether this adapter can drive SWD. Transport presence only; no
    /// SWD operations are defined on the wire yet.
    fn supports_swd(&self) -> bool {
        false
    }

    /// The GPIO capability, if this adapter has one.
    fn gpio(&mut self) -> Option<&mut dyn GpioInterface> {
        None
    }
}

/// JTAG capability: TAP navigation, scans and performance counters.
///
/// All scan vectors are LSB-first within each byte; see the crate docs for
/// the tail-bit convention.
pub trait JtagInterface {
    /// Clocks TMS high five times, forcing Test-Logic-Reset from any state.
    fn test_logic_reset(&mut self) -> Result<(), AdapterError>;

    /// Navigates Run-Test/Idle → Shift-IR.
    fn enter_shift_ir(&mut self) -> Result<(), AdapterError>;

    /// Navigates Exit1-IR → Update-IR → Run-Test/Idle.
    fn leave_exit1_ir(&mut self) -> Result<(), AdapterError>;

    /// Navigates Run-Test/Idle → Shift-DR.
    fn enter_shift_dr(&mut self) -> Result<(), AdapterError>;

    /// Navigates Exit1-DR → Update-DR → Run-Test/Idle.
    fn leave_exit1_dr(&mut self) -> Result<(), AdapterError>;

    /// Resets the TAP and settles in Run-Test/Idle.
    fn reset_to_idle(&mut self) -> Result<(), AdapterError>;

    /// Full-duplex shift of `nbits` bits from `tx`, capturing into `rx`
    /// when provided. With `last_tms` the final bit is clocked with TMS
    /// high, leaving the Shift state through Exit1.
    fn shift_data(
        &mut self,
        last_tms: bool,
        tx: &[u8],
        rx: Option<&mut [u8]>,
        nbits: u32,
    ) -> Result<(), AdapterError>;

    /// Write half of a split scan.
    ///
    /// Returns `true` when the backend deferred the operation: `rx` is left
    /// untouched and the captured data is collected by a later
    /// [`shift_data_read_only`](Self::shift_data_read_only) call. Returns
    /// `false` when the backend cannot defer, in which case it has executed
    /// the shift synchronously and already filled `rx`.
    fn shift_data_write_only(
        &mut self,
        last_tms: bool,
        tx: &[u8],
        rx: Option<&mut [u8]>,
        nbits: u32,
    ) -> Result<bool, AdapterError>;

    /// Read half of a split scan: collects the data captured by the oldest
    /// deferred write, flushing the queue first if it is still pending.
    ///
    /// Returns `true` when deferred data was collected into `rx`, `false`
    /// when the matching write had already executed synchronously.
    fn shift_data_read_only(&mut self, rx: &mut [u8], nbits: u32) -> Result<bool, AdapterError>;

    /// Issues `nbits` TCK pulses with TMS low, discarding TDO.
    fn send_dummy_clocks(&mut self, nbits: u32) -> Result<(), AdapterError>;

    /// Deferred form of [`send_dummy_clocks`](Self::send_dummy_clocks);
    /// queued until the next commit.
    fn send_dummy_clocks_deferred(&mut self, nbits: u32) -> Result<(), AdapterError>;

    /// Whether split (deferred-read) scans are supported.
    fn is_split_scan_supported(&self) -> bool;

    /// Cumulative number of shift operations.
    fn shift_op_count(&mut self) -> Result<u64, AdapterError>;

    /// Cumulative number of data bits clocked through the chain.
    fn data_bit_count(&mut self) -> Result<u64, AdapterError>;

    /// Cumulative number of TMS mode bits clocked for state changes.
    fn mode_bit_count(&mut self) -> Result<u64, AdapterError>;

    /// Cumulative number of dummy clocks issued.
    fn dummy_clock_count(&mut self) -> Result<u64, AdapterError>;

    /// Cumulative number of errors the backend recovered from internally.
    fn recoverable_error_count(&mut self) -> Result<u64, AdapterError>;
}

/// GPIO capability: an ordered bank of pins with cached reads and deferred
/// writes.
///
/// `read_gpio_state` / `write_gpio_state` move the whole bank between the
/// hardware and the cached view; the per-pin accessors never touch the
/// hardware on their own.
pub trait GpioInterface {
    /// Number of pins in the bank.
    fn gpio_count(&self) -> usize;

    /// Fetches the hardware bank into the cached view.
    fn read_gpio_state(&mut self) -> Result<(), AdapterError>;

    /// Flushes the cached view (including deferred per-pin changes) to the
    /// hardware.
    fn write_gpio_state(&mut self) -> Result<(), AdapterError>;

    /// Cached logic level of pin `index`.
    fn value_cached(&self, index: usize) -> bool;

    /// Cached direction of pin `index`; true when driven as an output.
    fn direction(&self, index: usize) -> bool;

    /// Stages a new level for pin `index`; takes effect on the next
    /// [`write_gpio_state`](Self::write_gpio_state).
    fn set_value_deferred(&mut self, index: usize, value: bool);

    /// Stages a new direction for pin `index`; takes effect on the next
    /// [`write_gpio_state`](Self::write_gpio_state).
    fn set_direction_deferred(&mut self, index: usize, is_output: bool);
}
