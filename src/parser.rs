// ABOUTME: Resumable PTP USB bulk PDU parser, one independent instance per role (rx/tx/self/send)
// ABOUTME: step() is fed arbitrary byte slices and rewrites trans_id in place per the role's policy

use crate::container::PduHeader;
use crate::error::{FilterError, FilterResult};
use crate::transaction::TransactionIdRewriter;

/// Which of the four byte streams a [`PduParser`] instance is watching.
/// The four instances never share parser state, only the
/// [`TransactionIdRewriter`] passed into [`PduParser::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserRole {
    /// client -> device
    Rx,
    /// device -> client
    Tx,
    /// device -> filter, responses to injected preview commands
    SelfRole,
    /// filter -> device, the outgoing injected command
    Send,
}

impl ParserRole {
    /// `rx`/`send` cannot resume a header split across transfers; a short
    /// first transfer is a structural error for these two roles.
    fn requires_whole_header_per_transfer(self) -> bool {
        matches!(self, ParserRole::Rx | ParserRole::Send)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Command,
    Data,
    Response,
    Unknown,
}

fn body_kind(kind: crate::container::ContainerType) -> BodyKind {
    use crate::container::ContainerType::*;
    match kind {
        Command => BodyKind::Command,
        Data => BodyKind::Data,
        Response => BodyKind::Response,
        Event => BodyKind::Unknown,
    }
}

#[derive(Debug, Clone, Copy)]
enum ParserState {
    /// No PDU in flight; the next byte starts a fresh header.
    None,
    /// Same as `None` but a transaction is still open (a command/data body
    /// has completed and a response is expected before the parser reports
    /// "transaction done" to the filter state machine).
    WaitResponse,
    /// Accumulating the 12-byte header; `have` bytes of `buf` are valid.
    Header { have: u8, buf: [u8; PduHeader::SIZE] },
    /// Draining `remaining` payload bytes of a PDU whose header already
    /// completed.
    Body {
        remaining: u32,
        kind: BodyKind,
        header: PduHeader,
    },
}

/// Result of feeding bytes to [`PduParser::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The input slice was exhausted before the current PDU completed.
    Continue,
    /// One full PDU was parsed. `header.trans_id` is the value as it
    /// arrived on the wire *before* any rewrite — callers that need the
    /// post-rewrite id should read it back out of the slice they passed
    /// in.
    Done(PduHeader),
}

/// One of the four independent PDU parsers a filter instance owns.
#[derive(Debug)]
pub struct PduParser {
    state: ParserState,
    rewrite_target: Option<u32>,
}

impl Default for PduParser {
    fn default() -> Self {
        PduParser {
            state: ParserState::None,
            rewrite_target: None,
        }
    }
}

impl PduParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a transaction is currently open (a command/data body has
    /// been seen and its response has not yet been parsed).
    pub fn awaiting_response(&self) -> bool {
        matches!(self.state, ParserState::WaitResponse)
    }

    fn rewrite_target_for(role: ParserRole, rewriter: &TransactionIdRewriter) -> Option<u32> {
        match role {
            ParserRole::Rx => Some(rewriter.current()),
            ParserRole::Tx => rewriter.peek_restore(),
            ParserRole::Send => Some(rewriter.stamp()),
            ParserRole::SelfRole => None,
        }
    }

    /// Feed a chunk of bytes arriving on this role's stream. Mutates `buf`
    /// in place for roles that rewrite `trans_id`. May be called any
    /// number of times with arbitrarily sized slices, including slices
    /// that split a header or a payload at any byte offset.
    pub fn step(
        &mut self,
        buf: &mut [u8],
        rewriter: &mut TransactionIdRewriter,
        role: ParserRole,
    ) -> FilterResult<StepOutcome> {
        let mut pos = 0usize;
        loop {
            match &mut self.state {
                ParserState::None | ParserState::WaitResponse => {
                    if pos >= buf.len() {
                        return Ok(StepOutcome::Continue);
                    }
                    self.rewrite_target = Self::rewrite_target_for(role, rewriter);
                    self.state = ParserState::Header {
                        have: 0,
                        buf: [0u8; PduHeader::SIZE],
                    };
                }
                ParserState::Header { have, buf: hbuf } => {
                    if pos >= buf.len() {
                        if *have > 0 && role.requires_whole_header_per_transfer() {
                            return Err(FilterError::HeaderSplitUnsupported);
                        }
                        return Ok(StepOutcome::Continue);
                    }
                    let need = PduHeader::SIZE - *have as usize;
                    let avail = buf.len() - pos;
                    let take = need.min(avail);
                    for i in 0..take {
                        let idx = *have as usize + i;
                        let original = buf[pos + i];
                        hbuf[idx] = original;
                        if idx >= 8 {
                            if let Some(target) = self.rewrite_target {
                                buf[pos + i] = target.to_le_bytes()[idx - 8];
                            }
                        }
                    }
                    *have += take as u8;
                    pos += take;
                    if (*have as usize) < PduHeader::SIZE {
                        if role.requires_whole_header_per_transfer() {
                            return Err(FilterError::HeaderSplitUnsupported);
                        }
                        return Ok(StepOutcome::Continue);
                    }
                    let header = PduHeader::decode(hbuf)?;
                    match role {
                        ParserRole::Rx => {
                            rewriter.stash_and_substitute(header.trans_id);
                        }
                        ParserRole::Tx => {
                            rewriter.restore();
                        }
                        ParserRole::Send | ParserRole::SelfRole => {}
                    }
                    let kind = body_kind(header.kind);
                    self.state = ParserState::Body {
                        remaining: header.payload_len(),
                        kind,
                        header,
                    };
                }
                ParserState::Body {
                    remaining,
                    kind,
                    header,
                } => {
                    if *remaining > 0 {
                        if pos >= buf.len() {
                            return Ok(StepOutcome::Continue);
                        }
                        let avail = (buf.len() - pos) as u32;
                        let take = (*remaining).min(avail);
                        pos += take as usize;
                        *remaining -= take;
                        if *remaining > 0 {
                            return Ok(StepOutcome::Continue);
                        }
                    }
                    let done_header = *header;
                    let transaction_done = matches!(kind, BodyKind::Response);
                    self.state = if transaction_done {
                        ParserState::None
                    } else {
                        ParserState::WaitResponse
                    };
                    return Ok(StepOutcome::Done(done_header));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerType;

    fn header_bytes(length: u32, kind: u16, code: u16, trans_id: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(length as usize);
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&code.to_le_bytes());
        out.extend_from_slice(&trans_id.to_le_bytes());
        out.resize(length as usize, 0xAB);
        out
    }

    #[test]
    fn parses_header_only_response_in_one_call() {
        let mut parser = PduParser::new();
        let mut rewriter = TransactionIdRewriter::new();
        let mut buf = header_bytes(12, 3, 0x2001, 7);
        let outcome = parser.step(&mut buf, &mut rewriter, ParserRole::SelfRole).unwrap();
        match outcome {
            StepOutcome::Done(header) => {
                assert_eq!(header.kind, ContainerType::Response);
                assert_eq!(header.trans_id, 7);
            }
            _ => panic!("expected Done"),
        }
    }

    #[test]
    fn rx_stashes_original_and_substitutes_current() {
        let mut parser = PduParser::new();
        let mut rewriter = TransactionIdRewriter::new();
        rewriter.advance();
        rewriter.advance(); // current = 2
        let mut buf = header_bytes(12, 1, 0x1001, 0x30);
        let outcome = parser.step(&mut buf, &mut rewriter, ParserRole::Rx).unwrap();
        assert!(matches!(outcome, StepOutcome::Done(_)));
        assert_eq!(u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]), 2);
        assert_eq!(rewriter.peek_restore(), Some(0x30));
    }

    #[test]
    fn tx_restores_stashed_original_across_split_header() {
        let mut rewriter = TransactionIdRewriter::new();
        rewriter.stash_and_substitute(0x30);

        let mut parser = PduParser::new();
        let mut full = header_bytes(64, 2, 0x9153, 0x10);
        let (first, second) = full.split_at_mut(9);

        let mut first = first.to_vec();
        let outcome = parser.step(&mut first, &mut rewriter, ParserRole::Tx).unwrap();
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(first[8], 0x30);

        let mut second = second.to_vec();
        let outcome = parser.step(&mut second, &mut rewriter, ParserRole::Tx).unwrap();
        match outcome {
            StepOutcome::Done(header) => {
                assert_eq!(header.trans_id, 0x10);
                assert_eq!(header.code, 0x9153);
                assert_eq!(header.length, 64);
            }
            _ => panic!("expected Done"),
        }
        assert_eq!(second[0], 0);
        assert_eq!(second[1], 0);
        assert_eq!(second[2], 0);
        assert_eq!(rewriter.peek_restore(), None);
        let _ = full.drain(..0);
    }

    #[test]
    fn rx_header_split_bypasses() {
        let mut parser = PduParser::new();
        let mut rewriter = TransactionIdRewriter::new();
        let mut first = vec![12, 0, 0, 0, 1, 0, 0, 0x10];
        let err = parser.step(&mut first, &mut rewriter, ParserRole::Rx).unwrap_err();
        assert_eq!(err, FilterError::HeaderSplitUnsupported);
    }

    #[test]
    fn rejects_malformed_length() {
        let mut parser = PduParser::new();
        let mut rewriter = TransactionIdRewriter::new();
        let mut buf = header_bytes(4, 1, 0, 0);
        let err = parser.step(&mut buf, &mut rewriter, ParserRole::SelfRole).unwrap_err();
        assert!(matches!(err, FilterError::TruncatedLength { length: 4 }));
    }
}
