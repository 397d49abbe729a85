//! Client status query for a reply placeholder. Read-only and idempotent.

use crate::message::MessageView;
use crate::relay::error::RelayError;
use crate::store::MessageStore;

#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Pending,
    Ready(MessageView),
}

/// Status of `msg_id` for the signed-in `user_id`. Ownership is checked before
/// status, so another user's record is `Forbidden` whether pending or resolved.
pub async fn poll_message(
    store: &dyn MessageStore,
    user_id: &str,
    msg_id: Option<&str>,
) -> Result<PollStatus, RelayError> {
    let Some(msg_id) = msg_id.filter(|s| !s.is_empty()) else {
        return Err(RelayError::BadRequest("msgId is required".to_string()));
    };
    let Some(message) = store.get(msg_id).await? else {
        return Err(RelayError::NotFound);
    };
    if message.user_id != user_id {
        return Err(RelayError::Forbidden);
    }
    Ok(match message.view() {
        Some(view) => PollStatus::Ready(view),
        None => PollStatus::Pending,
    })
}
