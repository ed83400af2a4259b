//! Read interfaces onto the live/session and moderation collaborators.
//!
//! The ledger core never decides who is live or who moderates a channel;
//! it consumes these facts through the narrow traits below. The embedding
//! application implements them against its session tracker and moderation
//! store; tests use fixed stubs.

use chrono::{DateTime, Utc};

use crate::domain::{StreamerId, UserId};

/// Snapshot of one viewer's presence in a streamer's live session.
#[derive(Debug, Clone, Copy)]
pub struct ViewerPresence {
    /// Identifier of the live session the presence belongs to.
    pub session_id: uuid::Uuid,
    /// Last heartbeat received from the viewer, if any.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Cumulative watched minutes in the current live session.
    pub watched_minutes: u32,
}

/// Live/session subsystem view consumed by chest join eligibility.
pub trait LiveDirectory: Send + Sync {
    /// Whether the streamer has an active live session right now.
    fn is_live(&self, streamer: StreamerId) -> bool;

    /// The viewer's presence in the streamer's current live session, or
    /// `None` if the viewer has not been seen in it.
    fn viewer_presence(&self, streamer: StreamerId, viewer: UserId) -> Option<ViewerPresence>;
}

/// Moderation subsystem view consumed by the support split.
pub trait ModerationDirectory: Send + Sync {
    /// The streamer's currently active moderators, in a stable order.
    /// The last entry receives the moderator-share division remainder.
    fn active_moderators(&self, streamer: StreamerId) -> Vec<UserId>;
}
