// ABOUTME: Pure classification helpers shared by FilterCore's on_rx/on_tx handling
// ABOUTME: kept separate from core.rs so the decision table has no lock/queue bookkeeping mixed in

use crate::container::{ContainerType, PduHeader};

/// What a just-parsed client command PDU means to the filter state
/// machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    OpenSession,
    CloseSession,
    Preview,
    Other,
}

/// Classify a command header against the active model's preview opcode.
/// Only meaningful for `header.kind == Command`; callers must check that
/// first.
pub fn classify(header: &PduHeader, preview_opcode: u16) -> Classification {
    debug_assert_eq!(header.kind, ContainerType::Command);
    if header.is_open_session() {
        Classification::OpenSession
    } else if header.is_close_session() {
        Classification::CloseSession
    } else if header.code == preview_opcode {
        Classification::Preview
    } else {
        Classification::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerType;

    fn command(code: u16) -> PduHeader {
        PduHeader {
            length: 12,
            kind: ContainerType::Command,
            code,
            trans_id: 0,
        }
    }

    #[test]
    fn recognizes_preview_opcode() {
        assert_eq!(classify(&command(0x9153), 0x9153), Classification::Preview);
    }

    #[test]
    fn recognizes_session_commands() {
        assert_eq!(classify(&command(0x1002), 0x9153), Classification::OpenSession);
        assert_eq!(classify(&command(0x1003), 0x9153), Classification::CloseSession);
    }

    #[test]
    fn everything_else_is_other() {
        assert_eq!(classify(&command(0x1001), 0x9153), Classification::Other);
    }
}
