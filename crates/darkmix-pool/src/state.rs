//! Pool state transitions.
//!
//! [`allows`] is the transition table for locally driven changes. States a
//! submitter copies from its relay's status updates bypass the table, since
//! the relay may have advanced several steps between two updates.

use darkmix_transport::messages::{DsStatus, TypedMessage};
use darkmix_types::{EntryStatus, PoolState};

use crate::{MixContext, MixingPool};

/// Whether a node may move from `from` to `to` on its own.
pub fn allows(from: PoolState, to: PoolState) -> bool {
    use PoolState::*;

    if from == to || matches!(to, Idle | Error) {
        return true;
    }
    match from {
        Idle => matches!(to, Queue | AcceptingEntries),
        Queue => matches!(to, AcceptingEntries),
        AcceptingEntries => matches!(to, Queue | FinalizeTransaction),
        FinalizeTransaction => matches!(to, Signing | AcceptingEntries),
        Signing => matches!(to, Transmission | AcceptingEntries | Success),
        Transmission => matches!(to, AcceptingEntries | Success),
        Error => matches!(to, AcceptingEntries),
        Success => false,
    }
}

impl MixingPool {
    /// Move to `new` if the table allows it. Returns whether it moved.
    pub(crate) fn update_state(&mut self, ctx: &mut MixContext<'_>, new: PoolState) -> bool {
        if !allows(self.state, new) {
            tracing::warn!(from = %self.state, to = %new, "refusing state transition");
            return false;
        }
        self.apply_state(ctx, new);
        true
    }

    /// The state-change hook. Relays never enter Error or Success, and
    /// announce every change with a reset status.
    pub(crate) fn apply_state(&mut self, ctx: &mut MixContext<'_>, new: PoolState) {
        if self.is_relay() && new.is_terminal() {
            tracing::debug!(state = %new, "relay ignores terminal state");
            return;
        }
        if self.state != new {
            tracing::info!(from = %self.state, to = %new, session = self.session_id, "pool state");
            self.last_state_change_ms = ctx.now_ms;
            self.state = new;
            if self.is_relay() {
                self.relay_status(ctx, EntryStatus::Reset, String::new());
            }
        }
    }

    /// Broadcast a status update to every peer.
    pub(crate) fn relay_status(
        &self,
        ctx: &mut MixContext<'_>,
        status: EntryStatus,
        error: String,
    ) {
        ctx.outbox.broadcast(TypedMessage::Dssu(self.status_message(status, error)));
    }

    pub(crate) fn status_message(&self, status: EntryStatus, error: String) -> DsStatus {
        DsStatus {
            session_id: self.session_id,
            state: self.state.code(),
            entries: self.entries.len() as u32,
            accepted: status.code(),
            error,
        }
    }
}
