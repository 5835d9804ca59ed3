// ABOUTME: Top-level filter state machine and its transition table
// ABOUTME: Bypassed is terminal; every other state can only be reached through the documented edges

use tracing::{debug, warn};

/// Top-level filter state. `Bypassed` is terminal: once entered, the
/// filter forwards all traffic unmodified until the device is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterState {
    Init,
    Bypassed,
    Idle,
    /// a client non-preview command is in flight
    Command,
    /// streaming armed, idle between frames
    Active,
    /// an injected preview transaction is in flight
    Busy,
    /// a client command is in flight while streaming is armed
    Wait,
    /// current frame marked for discard; still draining from the device
    Drop,
    /// buffer full, awaiting a consumer
    Sleep,
    /// a client command arrived while sleeping
    SleepWait,
}

/// Why a device-facing transaction finished, as observed by C2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// `rx` saw a non-preview client command; vendor recognized.
    NonPreviewCommandRecognized,
    /// `rx` saw a client preview command.
    ClientPreviewCommand,
    /// `rx` saw a client non-preview command.
    ClientNonPreviewCommand,
    /// `tx` finished parsing the response to a client command.
    ClientResponseComplete,
    /// the scheduler fired and submitted an injected preview.
    SchedulerSubmitted,
    /// an injected preview's response completed; frame accepted and under
    /// the buffer limit.
    InjectedFrameAccepted,
    /// an injected preview's response completed with a device or protocol
    /// error, or the buffer is already at its frame limit.
    InjectedFrameRejected,
    /// the frame buffer had no room for the next inbound data PDU and no
    /// consumer is mid-frame.
    BufferBackpressure,
    /// the frame currently marked for drop finished draining from the
    /// device.
    DropDrained,
    /// `rx` saw `OpenSession`/`CloseSession`.
    SessionReset,
    /// any parser error, allocation failure, submission failure, or
    /// invariant violation.
    Fault,
}

impl FilterState {
    /// Apply one trigger, returning the resulting state. Panics are never
    /// used for unmodeled edges: an unrecognized (state, trigger) pair is
    /// simply left in place and logged, matching "any ... unexpected
    /// state observation -> bypassed" being the caller's job to detect
    /// upstream, not this function's.
    pub fn apply(self, trigger: Trigger) -> FilterState {
        use FilterState::*;
        use Trigger::*;

        if trigger == Fault {
            warn!(from = ?self, "filter fault, transitioning to bypassed");
            return Bypassed;
        }
        if self == Bypassed {
            return Bypassed;
        }

        let next = match (self, trigger) {
            (Init, NonPreviewCommandRecognized) => Idle,
            (Idle, ClientPreviewCommand) => Busy,
            (Idle, ClientNonPreviewCommand) => Command,
            (Command, ClientResponseComplete) => Idle,
            (Active, SchedulerSubmitted) => Busy,
            (Active, ClientPreviewCommand) => Active,
            (Active, ClientNonPreviewCommand) => Wait,
            (Wait, ClientResponseComplete) => Active,
            (Busy, InjectedFrameAccepted) => Active,
            // Open Question resolution: an injected-command device/protocol
            // error or a full buffer both favor recoverability over
            // bypassing the whole session.
            (Busy, InjectedFrameRejected) => Sleep,
            (Busy, BufferBackpressure) => Drop,
            (Drop, DropDrained) => Sleep,
            (Sleep, ClientPreviewCommand) => Active,
            (Sleep, ClientNonPreviewCommand) => SleepWait,
            (SleepWait, ClientResponseComplete) => Sleep,
            (_, SessionReset) => Idle,
            (state, _) => {
                debug!(from = ?state, trigger = ?trigger, "no transition for this trigger in this state");
                state
            }
        };

        if next != self {
            debug!(from = ?self, to = ?next, trigger = ?trigger, "filter state transition");
        }
        next
    }

    /// Whether the scheduler may submit an injected preview command from
    /// this state. Only true in `Active`.
    pub fn scheduler_armed(self) -> bool {
        matches!(self, FilterState::Active)
    }

    pub fn is_bypassed(self) -> bool {
        matches!(self, FilterState::Bypassed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use FilterState::*;
    use Trigger::*;

    #[test]
    fn stream_on_sequence() {
        let s = Idle.apply(ClientPreviewCommand);
        assert_eq!(s, Busy);
        let s = s.apply(InjectedFrameAccepted);
        assert_eq!(s, Active);
    }

    #[test]
    fn non_preview_during_stream() {
        let s = Active.apply(ClientNonPreviewCommand);
        assert_eq!(s, Wait);
        let s = s.apply(ClientResponseComplete);
        assert_eq!(s, Active);
    }

    #[test]
    fn device_error_goes_to_sleep_not_bypassed() {
        let s = Busy.apply(InjectedFrameRejected);
        assert_eq!(s, Sleep);
    }

    #[test]
    fn bypassed_is_terminal() {
        let s = Active.apply(Fault);
        assert_eq!(s, Bypassed);
        assert_eq!(s.apply(ClientPreviewCommand), Bypassed);
        assert_eq!(s.apply(SessionReset), Bypassed);
    }

    #[test]
    fn buffer_full_then_drained() {
        let s = Busy.apply(BufferBackpressure);
        assert_eq!(s, Drop);
        let s = s.apply(DropDrained);
        assert_eq!(s, Sleep);
        let s = s.apply(ClientPreviewCommand);
        assert_eq!(s, Active);
    }

    #[test]
    fn session_reset_from_any_state() {
        assert_eq!(Active.apply(SessionReset), Idle);
        assert_eq!(Busy.apply(SessionReset), Idle);
        assert_eq!(SleepWait.apply(SessionReset), Idle);
    }

    #[test]
    fn scheduler_only_armed_in_active() {
        assert!(Active.scheduler_armed());
        assert!(!Busy.scheduler_armed());
        assert!(!Idle.scheduler_armed());
    }
}
