//! A kernel-resident USB/IP stub-side filter for PTP cameras.
//!
//! The filter sits between a local PTP device and a remote USB/IP
//! client. It transparently forwards ordinary PTP transactions while
//! independently driving the camera's preview (viewfinder) command at a
//! configured frame rate, buffering the results, and serving them to the
//! client on demand — all without disturbing the client's own
//! transaction identifiers.
//!
//! This crate owns no event loop and no USB host-controller binding of
//! its own: it is a library embedded by a USB/IP stub-side host process,
//! which calls [`Filter::probe`], [`Filter::on_rx`], [`Filter::on_tx`],
//! and [`Filter::remove`] as the four points of contact.
//!
//! ```rust,no_run
//! use usbip_ptp_filter::config::FilterConfig;
//! use usbip_ptp_filter::device::DeviceTable;
//! use usbip_ptp_filter::Filter;
//!
//! let table = DeviceTable::new();
//! let filter = Filter::probe(&table, 0x04a9, 0x323b, FilterConfig::default())
//!     .expect("Canon EOS 650D is in the built-in table");
//! assert!(!filter.state().is_bypassed());
//! ```

#![forbid(unsafe_code)]

pub mod buffer;
pub mod config;
pub mod container;
pub mod core;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod parser;
pub mod scheduler;
pub mod state;
pub mod transaction;
pub mod usbip;


pub use config::FilterConfig;
pub use core::{Filter, FilterCore, FilterEvent};
pub use device::{DeviceModel, DeviceTable};
pub use error::{FilterError, FilterResult};
pub use state::FilterState;
pub use usbip::{Direction, Pipe, PipeType, Urb, UrbHandle, UrbOutcome, UsbIpCommand, UsbIpEnvelope};

/// Error type returned by fallible constructors that aren't part of the
/// hot `on_rx`/`on_tx` path.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Convenience alias matching [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
