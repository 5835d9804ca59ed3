// ABOUTME: Error taxonomy for the filter core
// ABOUTME: every fatal variant here drives the filter into Bypassed; nothing is ever returned to the client

use thiserror::Error;

/// Failures the filter core can observe while driving the PDU parser, the
/// frame buffer, or the scheduler.
///
/// None of these ever reach the USB/IP client: `on_rx`/`on_tx` swallow
/// every `FilterError` and collapse the filter to
/// [`crate::state::FilterState::Bypassed`] instead. The variant only lives
/// on to be logged (via `tracing`) and, if an observer is registered, to be
/// reported through [`crate::FilterEvent::Bypassed`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// A PDU header claimed a length shorter than the 12-byte header itself.
    #[error("PDU length {length} is shorter than the 12-byte header")]
    TruncatedLength { length: u32 },

    /// The PDU `type` field was not one of command/data/response/event.
    #[error("unknown PDU container type {0:#06x}")]
    UnknownContainerType(u16),

    /// A bulk transfer delivered fewer than 12 header bytes to a role that
    /// cannot resume a split header (`rx`/`send`).
    #[error("header split across transfers is not supported for this role")]
    HeaderSplitUnsupported,

    /// A carrier or buffer allocation was requested but none were free.
    #[error("no free {0} available")]
    ResourceExhausted(&'static str),

    /// An injected URB completed with a non-zero device status.
    #[error("device returned non-zero status {0} for an injected transfer")]
    DeviceError(i32),

    /// The PTP response code on an injected frame was not `OK`.
    #[error("injected preview response code {0:#06x} was not OK")]
    ProtocolError(u16),

    /// A public method observed the filter in a state its own invariants
    /// say should be unreachable from the current trigger.
    #[error("filter observed in an unexpected state for this transition")]
    UnexpectedState,
}

pub type FilterResult<T> = Result<T, FilterError>;
