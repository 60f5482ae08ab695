//! Device: a cloud-registered unit identified by its serial number.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Device serial number as reported by the cloud device list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceSn(String);

impl DeviceSn {
    /// Wrap a serial number.
    #[must_use]
    pub fn new(sn: impl Into<String>) -> Self {
        Self(sn.into())
    }

    /// Borrow the raw serial.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceSn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceSn {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One entry of the cloud device list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub sn: DeviceSn,
    pub display_name: String,
    pub product_type: String,
    pub online: bool,
}

/// Kind of inbound/outbound message, one per MQTT topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageClass {
    /// Telemetry (`/quota`), merged into the parameter map.
    Data,
    /// Outbound set-command echo.
    Set,
    /// Device reply to a set-command.
    SetReply,
    /// Outbound get request echo.
    Get,
    /// Device reply to a get request.
    GetReply,
    /// Online/offline status notification.
    Status,
}

impl MessageClass {
    /// Every class, in routing order.
    pub const ALL: [Self; 6] = [
        Self::Data,
        Self::Set,
        Self::SetReply,
        Self::Get,
        Self::GetReply,
        Self::Status,
    ];

    /// The trailing topic segment used by the public API.
    #[must_use]
    pub fn topic_suffix(self) -> &'static str {
        match self {
            Self::Data => "quota",
            Self::Set => "set",
            Self::SetReply => "set_reply",
            Self::Get => "get",
            Self::GetReply => "get_reply",
            Self::Status => "status",
        }
    }

    /// Reverse of [`topic_suffix`](Self::topic_suffix).
    #[must_use]
    pub fn from_topic_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.topic_suffix() == suffix)
    }
}

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic_suffix())
    }
}

/// MQTT topics for one device under the public-API scheme
/// `/open/{mqtt_user}/{sn}/{suffix}`.
///
/// The public API publishes no get/get-reply topics, so those are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopics {
    pub data: String,
    pub set: String,
    pub set_reply: String,
    pub get: Option<String>,
    pub get_reply: Option<String>,
    pub status: Option<String>,
}

impl DeviceTopics {
    /// Build the public-API topic set for `sn`.
    #[must_use]
    pub fn public(mqtt_user: &str, sn: &DeviceSn) -> Self {
        let topic =
            |class: MessageClass| format!("/open/{mqtt_user}/{sn}/{}", class.topic_suffix());
        Self {
            data: topic(MessageClass::Data),
            set: topic(MessageClass::Set),
            set_reply: topic(MessageClass::SetReply),
            get: None,
            get_reply: None,
            status: Some(topic(MessageClass::Status)),
        }
    }

    /// All topics to subscribe to.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<&str> {
        [
            Some(self.data.as_str()),
            self.get.as_deref(),
            self.get_reply.as_deref(),
            Some(self.set.as_str()),
            Some(self.set_reply.as_str()),
            self.status.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Split a public-API topic into the device serial and message class.
///
/// Returns `None` for topics outside the `/open/{user}/{sn}/{suffix}` scheme.
#[must_use]
pub fn parse_public_topic(topic: &str) -> Option<(DeviceSn, MessageClass)> {
    let mut parts = topic.strip_prefix("/open/")?.split('/');
    let _user = parts.next().filter(|u| !u.is_empty())?;
    let sn = parts.next().filter(|s| !s.is_empty())?;
    let class = MessageClass::from_topic_suffix(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }
    Some((DeviceSn::new(sn), class))
}
