// ABOUTME: Shared transaction-id state: the one counter and one-shot slot all four parser roles rewrite through
// ABOUTME: current advances only when an injected transaction's response is consumed

/// `current_trans_id` and the one-shot `rx_trans_id` slot shared by every
/// [`crate::parser::PduParser`] role on a filter. The four parser
/// instances otherwise share no state (per-role `state` machines are
/// fully independent) — this is deliberately the *only* thing threaded
/// through all of them.
#[derive(Debug, Default)]
pub struct TransactionIdRewriter {
    current: u32,
    rx_original: Option<u32>,
}

impl TransactionIdRewriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    /// `rx` header completion: stash the client's original id, return the
    /// id the device should see instead.
    pub fn stash_and_substitute(&mut self, client_trans_id: u32) -> u32 {
        self.rx_original = Some(client_trans_id);
        self.current
    }

    /// `tx` header completion: hand back the client's original id, if one
    /// is outstanding. Returns `None` if no `rx` stash is pending (the
    /// response belongs to an injected transaction and should go to
    /// `self`, not `tx`, in which case the caller never calls this).
    pub fn restore(&mut self) -> Option<u32> {
        self.rx_original.take()
    }

    /// Non-consuming look at the pending stash, used by the `tx` parser
    /// to rewrite trans_id bytes as they arrive, before the header is
    /// fully parsed and `restore` is called.
    pub fn peek_restore(&self) -> Option<u32> {
        self.rx_original
    }

    /// `send` submission: stamp with the current id.
    pub fn stamp(&self) -> u32 {
        self.current
    }

    /// Advance past the id just retired by a completed transaction.
    pub fn advance(&mut self) {
        self.current = self.current.wrapping_add(1);
    }

    /// `OpenSession` on `rx`: reset the counter for a fresh session.
    pub fn reset(&mut self) {
        self.current = 0;
        self.rx_original = None;
    }
}
