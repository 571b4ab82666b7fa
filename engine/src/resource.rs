//! Remote resource collections and their paths.

use std::borrow::Cow;
use std::fmt;

/// A named collection on the remote platform.
///
/// Single-record routes use the singular name (`/enduser/{id}`), list routes
/// use the plural one (`/endusers`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceType {
    plural: Cow<'static, str>,
    singular: Cow<'static, str>,
}

impl ResourceType {
    pub const ENDUSERS: ResourceType = ResourceType::fixed("endusers", "enduser");
    pub const USERS: ResourceType = ResourceType::fixed("users", "user");
    pub const CHAT_ROOMS: ResourceType = ResourceType::fixed("chat-rooms", "chat-room");
    pub const CHATS: ResourceType = ResourceType::fixed("chats", "chat");

    const fn fixed(plural: &'static str, singular: &'static str) -> Self {
        Self {
            plural: Cow::Borrowed(plural),
            singular: Cow::Borrowed(singular),
        }
    }

    /// A resource with explicit plural and singular names.
    pub fn new(plural: impl Into<String>, singular: impl Into<String>) -> Self {
        Self {
            plural: Cow::Owned(plural.into()),
            singular: Cow::Owned(singular.into()),
        }
    }

    /// Derive the singular name by dropping one trailing `s`.
    pub fn from_plural(plural: impl Into<String>) -> Self {
        let plural = plural.into();
        let singular = plural.strip_suffix('s').unwrap_or(&plural).to_string();
        Self::new(plural, singular)
    }

    pub fn plural(&self) -> &str {
        &self.plural
    }

    pub fn singular(&self) -> &str {
        &self.singular
    }

    /// `POST` target for creates.
    pub(crate) fn collection_path(&self) -> String {
        format!("/{}", self.singular)
    }

    /// `GET`/`PATCH`/`DELETE` target for one record.
    pub(crate) fn record_path(&self, id: &str) -> String {
        format!("/{}/{}", self.singular, id)
    }

    /// `GET` target for lists.
    pub(crate) fn list_path(&self) -> String {
        format!("/{}", self.plural)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.plural)
    }
}
