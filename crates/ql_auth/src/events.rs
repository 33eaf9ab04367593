//! Change notifications for UIs and other observers.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::{Account, IdentityEndpoint};

/// One logical change to the session state.
///
/// Serializes as `{ "event": <name>, "payload": ... }`,
/// where `<name>` is [`SessionEvent::name`]. Both are
/// relied upon by subscribers, keep them stable.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "event", content = "payload")]
pub enum SessionEvent {
    /// An account was added or replaced.
    #[serde(rename = "userProfile")]
    UserProfile(Account),
    /// An account was removed (payload: its id).
    #[serde(rename = "userProfileRemove")]
    UserProfileRemove(String),
    /// The selected account changed. Empty id: nothing selected.
    #[serde(rename = "userSelect", rename_all = "camelCase")]
    UserSelect {
        account_id: String,
        profile_id: String,
    },
    /// The selected game profile of an account changed.
    #[serde(rename = "userGameProfileSelect", rename_all = "camelCase")]
    UserGameProfileSelect {
        account_id: String,
        profile_id: String,
    },
    /// The endpoint list changed (payload: the whole list).
    #[serde(rename = "authServices")]
    AuthServices(Vec<IdentityEndpoint>),
    /// An endpoint was appended.
    #[serde(rename = "authServiceAdd")]
    AuthServiceAdd(IdentityEndpoint),
}

impl SessionEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::UserProfile(_) => "userProfile",
            SessionEvent::UserProfileRemove(_) => "userProfileRemove",
            SessionEvent::UserSelect { .. } => "userSelect",
            SessionEvent::UserGameProfileSelect { .. } => "userGameProfileSelect",
            SessionEvent::AuthServices(_) => "authServices",
            SessionEvent::AuthServiceAdd(_) => "authServiceAdd",
        }
    }
}

/// Receives every [`SessionEvent`], in order, right after
/// the change was applied. Called with the session locked,
/// so it must not block or call back into the manager.
pub trait StateNotifier: Send + Sync {
    fn notify(&self, event: &SessionEvent);
}

/// Fans events out over a tokio broadcast channel.
///
/// Slow subscribers lag (and skip events) instead of
/// holding up the session.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<SessionEvent>,
}

impl BroadcastNotifier {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl StateNotifier for BroadcastNotifier {
    fn notify(&self, event: &SessionEvent) {
        // No subscribers is fine
        _ = self.sender.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_is_stable() {
        let event = SessionEvent::UserSelect {
            account_id: "a".to_owned(),
            profile_id: "p".to_owned(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({
                "event": "userSelect",
                "payload": { "accountId": "a", "profileId": "p" }
            })
        );
        assert_eq!(
            serde_json::to_value(SessionEvent::UserProfileRemove("a".to_owned())).unwrap()["event"],
            SessionEvent::UserProfileRemove(String::new()).name()
        );
    }
}
