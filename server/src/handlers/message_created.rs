//! MESSAGE_CREATED: forward a practitioner's message into the patient's
//! Tellescope chat room.

use serde::Deserialize;
use serde_json::{json, Value};
use tellescope_sync::{
    Error, IdentityMatcher, LocalRecord, RemoteRecord, ResourceClient, ResourceType, Result,
    Transport,
};
use tracing::{debug, info, warn};

use super::HostEvent;
use crate::canvas;
use crate::effects::{Effect, Status};

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    sender: Option<Sender>,
}

#[derive(Debug, Deserialize)]
struct Sender {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    is_staff: bool,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

impl Sender {
    /// Staff snapshot used to find the matching Tellescope user.
    fn staff_record(&self, id: String) -> LocalRecord {
        let name = |part: &Option<String>| part.as_deref().unwrap_or_default().trim().to_string();
        LocalRecord::new(
            id,
            json!({
                "first_name": name(&self.first_name),
                "last_name": name(&self.last_name),
            }),
        )
    }
}

pub(super) async fn handle<T: Transport>(
    client: &ResourceClient<T>,
    event: &HostEvent,
) -> Vec<Effect> {
    let message = match event.target.instance.clone().map(serde_json::from_value::<Message>) {
        Some(Ok(message)) => message,
        Some(Err(_)) | None => return vec![failed("Message instance not available")],
    };

    let Some(patient_id) = event
        .context
        .pointer("/patient/id")
        .and_then(canvas::host_id)
    else {
        return vec![failed("Patient ID not found in message context")];
    };

    let Some(sender) = message.sender.as_ref().filter(|sender| sender.is_staff) else {
        debug!("Message for {} was not sent by staff", patient_id);
        return Vec::new();
    };
    let Some(content) = message.content.as_deref().filter(|c| !c.trim().is_empty()) else {
        return Vec::new();
    };
    let Some(staff_id) = sender.id.as_ref().and_then(canvas::host_id) else {
        return vec![failed("Sender ID not found on message")];
    };

    let staff = sender.staff_record(staff_id);
    match forward(client, &patient_id, &staff, canvas::to_html(content)).await {
        Ok(Some(chat)) => {
            info!("Forwarded message for {} as chat {}", patient_id, chat.id);
            vec![Effect::banner(Status::Success, "Message forwarded to Tellescope chat")]
        }
        Ok(None) => Vec::new(),
        Err(error) => {
            warn!("Forwarding message for {} failed: {}", patient_id, error);
            vec![failed(&format!("Failed to forward message: {error}"))]
        }
    }
}

fn failed(reason: &str) -> Effect {
    Effect::banner(Status::Error, format!("Chat forwarding error: {reason}"))
}

/// Post `html` into the patient's room. `None` when the patient has no
/// enduser yet.
async fn forward<T: Transport>(
    client: &ResourceClient<T>,
    patient_id: &str,
    staff: &LocalRecord,
    html: String,
) -> Result<Option<RemoteRecord>> {
    let matcher = IdentityMatcher::new(client);
    let patient = LocalRecord::new(patient_id, Value::Null);

    let enduser = matcher
        .find_match(&ResourceType::ENDUSERS, &patient, &canvas::enduser_criteria())
        .await?
        .unique(&ResourceType::ENDUSERS)?;
    let Some(enduser) = enduser else {
        debug!("No enduser for patient {}, not forwarding", patient_id);
        return Ok(None);
    };

    let sender = find_user(client, &matcher, staff).await?;
    let room = find_or_create_room(client, &matcher, &patient, &enduser.id).await?;

    let chat = client
        .create(
            &ResourceType::CHATS,
            &canvas::chat_payload(&room.id, &sender.id, html),
        )
        .await?;
    Ok(Some(chat))
}

/// The user by Canvas id, then by name, then any user at all.
async fn find_user<T: Transport>(
    client: &ResourceClient<T>,
    matcher: &IdentityMatcher<'_, T>,
    staff: &LocalRecord,
) -> Result<RemoteRecord> {
    let matched = matcher
        .find_match(&ResourceType::USERS, staff, &canvas::user_criteria())
        .await?
        .unique(&ResourceType::USERS)?;
    if let Some(user) = matched {
        return Ok(user);
    }

    debug!("No user for staff {}, using the first available", staff.id);
    let mut pager = client.pager(&ResourceType::USERS, None, 1);
    pager
        .next_page()
        .await?
        .and_then(|page| page.into_iter().next())
        .ok_or_else(|| Error::NotFound {
            resource: ResourceType::USERS.plural().to_string(),
            id: staff.id.clone(),
        })
}

async fn find_or_create_room<T: Transport>(
    client: &ResourceClient<T>,
    matcher: &IdentityMatcher<'_, T>,
    patient: &LocalRecord,
    enduser_id: &str,
) -> Result<RemoteRecord> {
    let existing = matcher
        .find_match(&ResourceType::CHAT_ROOMS, patient, &canvas::chat_room_criteria())
        .await?
        .unique(&ResourceType::CHAT_ROOMS)?;
    if let Some(room) = existing {
        return Ok(room);
    }

    let room = client
        .create(
            &ResourceType::CHAT_ROOMS,
            &canvas::chat_room_payload(&patient.id, enduser_id),
        )
        .await?;
    info!("Created chat room {} for patient {}", room.id, patient.id);
    Ok(room)
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use crate::effects::{Effect, Status};
    use serde_json::{json, Value};
    use tellescope_sync::memory::{Fault, MemoryRemote};
    use tellescope_sync::Method;

    fn message(content: &str, sender: Value) -> super::HostEvent {
        event(
            "MESSAGE_CREATED",
            json!({
                "target": {"id": "m-1", "instance": {"id": "m-1", "content": content, "sender": sender}},
                "context": {"patient": {"id": "p-1"}},
            }),
        )
    }

    fn staff() -> Value {
        json!({"id": "s-1", "is_staff": true, "first_name": " Grace ", "last_name": "Hopper"})
    }

    fn seeded() -> MemoryRemote {
        let remote = MemoryRemote::new();
        remote.insert("enduser", json!({"source": "Canvas", "externalId": "p-1"}));
        remote
    }

    fn banner(effects: &[Effect]) -> (Status, String) {
        match &effects[0] {
            Effect::AddBannerAlert(alert) => (alert.kind, alert.message.clone()),
            other => panic!("expected a banner, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn forwards_into_a_new_room() {
        let remote = seeded();
        let user = remote.insert("user", json!({"canvasId": "s-1"}));
        let bridge = bridge(&remote);

        let effects = bridge.handle(&message("hello\nthere", staff())).await;
        assert_eq!(
            banner(&effects),
            (Status::Success, "Message forwarded to Tellescope chat".to_string())
        );

        let rooms = remote.records("chat-room");
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0]["title"], "Health Discussion");
        assert_eq!(rooms[0]["externalId"], "p-1");
        assert_eq!(rooms[0]["userIds"], json!([]));

        let chats = remote.records("chat");
        assert_eq!(chats[0]["roomId"], rooms[0]["id"]);
        assert_eq!(chats[0]["senderId"], json!(user));
        assert_eq!(chats[0]["html"], "<p>hello<br>there</p>");
        assert_eq!(chats[0]["message"], "");
    }

    #[tokio::test]
    async fn reuses_the_existing_room() {
        let remote = seeded();
        remote.insert("user", json!({"canvasId": "s-1"}));
        let bridge = bridge(&remote);

        bridge.handle(&message("one", staff())).await;
        bridge.handle(&message("two", staff())).await;

        assert_eq!(remote.len("chat-room"), 1);
        assert_eq!(remote.len("chat"), 2);
    }

    #[tokio::test]
    async fn falls_back_to_name_then_any_user() {
        let remote = seeded();
        let by_name = remote.insert("user", json!({"fname": "Grace", "lname": "Hopper"}));
        let bridge = bridge(&remote);

        bridge.handle(&message("hi", staff())).await;
        assert_eq!(remote.records("chat")[0]["senderId"], json!(by_name));

        let remote = seeded();
        let anyone = remote.insert("user", json!({"fname": "Someone"}));
        let bridge = super::super::testing::bridge(&remote);

        bridge.handle(&message("hi", staff())).await;
        assert_eq!(remote.records("chat")[0]["senderId"], json!(anyone));
    }

    #[tokio::test]
    async fn ignores_patients_and_blank_messages() {
        let remote = seeded();
        remote.insert("user", json!({"canvasId": "s-1"}));
        let bridge = bridge(&remote);

        let patient_sender = json!({"id": "p-1", "is_staff": false});
        assert!(bridge.handle(&message("hi", patient_sender)).await.is_empty());
        assert!(bridge.handle(&message("  \n ", staff())).await.is_empty());
        assert_eq!(remote.request_count(), 0);
    }

    #[tokio::test]
    async fn unknown_patient_is_not_forwarded() {
        let remote = MemoryRemote::new();
        let bridge = bridge(&remote);

        assert!(bridge.handle(&message("hi", staff())).await.is_empty());
        assert_eq!(remote.count(Method::Post), 0);
    }

    #[tokio::test]
    async fn missing_context_and_users_are_reported() {
        let remote = seeded();
        let bridge = bridge(&remote);

        let mut orphan = message("hi", staff());
        orphan.context = json!({});
        let (status, text) = banner(&bridge.handle(&orphan).await);
        assert_eq!(status, Status::Error);
        assert_eq!(text, "Chat forwarding error: Patient ID not found in message context");

        let (status, text) = banner(&bridge.handle(&message("hi", staff())).await);
        assert_eq!(status, Status::Error);
        assert!(text.contains("users not found: s-1"), "{text}");
        assert_eq!(remote.len("chat"), 0);
    }

    #[tokio::test]
    async fn remote_failure_becomes_an_error_banner() {
        let remote = seeded();
        remote.insert("user", json!({"canvasId": "s-1"}));
        let bridge = bridge(&remote);
        remote.inject(Fault::Status(403));

        let (status, text) = banner(&bridge.handle(&message("hi", staff())).await);
        assert_eq!(status, Status::Error);
        assert!(text.starts_with("Chat forwarding error: Failed to forward message"));
    }
}
