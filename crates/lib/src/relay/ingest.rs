//! Worker reply ingestion: the only write path into a placeholder.

use crate::agents::WorkerIdentity;
use crate::message::{Message, MessageStatus, Role};
use crate::relay::error::RelayError;
use crate::store::MessageStore;

/// Resolve placeholder `msg_id` with `content` on behalf of an authenticated worker.
///
/// Checks run in order: missing fields, unknown id, owner, already resolved. The
/// final write is conditional on the record still being pending, so of two
/// concurrent attempts exactly one succeeds and the other gets `Conflict`.
pub async fn ingest_reply(
    store: &dyn MessageStore,
    worker: &WorkerIdentity,
    msg_id: Option<&str>,
    content: Option<&str>,
) -> Result<Message, RelayError> {
    let (Some(msg_id), Some(content)) = (
        msg_id.filter(|s| !s.is_empty()),
        content.filter(|s| !s.is_empty()),
    ) else {
        return Err(RelayError::BadRequest(
            "msgId and content are required".to_string(),
        ));
    };

    let Some(mut message) = store.get(msg_id).await? else {
        return Err(RelayError::NotFound);
    };
    if message.role != Role::Agent {
        return Err(RelayError::NotFound);
    }
    if message.user_id != worker.user_id {
        log::debug!(
            "reply to {} rejected: agent {} does not own it",
            msg_id,
            worker.agent_id
        );
        return Err(RelayError::Forbidden);
    }
    if !message.is_pending() {
        log::info!("reply to {} rejected: already resolved", msg_id);
        return Err(RelayError::Conflict);
    }

    if !store.resolve(msg_id, content).await? {
        log::info!("reply to {} lost the race to a concurrent reply", msg_id);
        return Err(RelayError::Conflict);
    }
    message.status = MessageStatus::Resolved;
    message.content = Some(content.to_string());
    log::info!("placeholder {} resolved by agent {}", msg_id, worker.agent_id);
    Ok(message)
}
