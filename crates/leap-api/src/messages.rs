// ── LEAP message envelope ──
//
// Every message on the wire is a JSON object with a `CommuniqueType`, a
// `Header` and an optional `Body`. Bodies stay as raw `serde_json::Value`
// here; typed decoding happens at the layer that knows the URL.

use std::fmt;
use std::str::FromStr;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::Error;

// ── CommuniqueType ──────────────────────────────────────────────────

/// The verb of a LEAP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommuniqueType {
    CreateRequest,
    ReadRequest,
    UpdateRequest,
    DeleteRequest,
    SubscribeRequest,
    UnsubscribeRequest,
    CreateResponse,
    ReadResponse,
    UpdateResponse,
    DeleteResponse,
    SubscribeResponse,
    UnsubscribeResponse,
    ExceptionResponse,
}

impl CommuniqueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateRequest => "CreateRequest",
            Self::ReadRequest => "ReadRequest",
            Self::UpdateRequest => "UpdateRequest",
            Self::DeleteRequest => "DeleteRequest",
            Self::SubscribeRequest => "SubscribeRequest",
            Self::UnsubscribeRequest => "UnsubscribeRequest",
            Self::CreateResponse => "CreateResponse",
            Self::ReadResponse => "ReadResponse",
            Self::UpdateResponse => "UpdateResponse",
            Self::DeleteResponse => "DeleteResponse",
            Self::SubscribeResponse => "SubscribeResponse",
            Self::UnsubscribeResponse => "UnsubscribeResponse",
            Self::ExceptionResponse => "ExceptionResponse",
        }
    }
}

impl fmt::Display for CommuniqueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommuniqueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_owned()))
            .map_err(|_| Error::Decode { raw: s.to_owned() })
    }
}

// ── ResponseStatus ──────────────────────────────────────────────────

/// A `StatusCode` header value split into its numeric code and message,
/// e.g. `"200 OK"` or `"404 NotFound"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseStatus {
    pub code: Option<u16>,
    pub message: String,
}

impl ResponseStatus {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Parse the `"<code> <message>"` wire form. A missing or unparseable
    /// code yields `code: None` with the whole string as the message.
    pub fn parse(data: &str) -> Self {
        match data.split_once(' ') {
            Some((code, rest)) => match code.parse::<u16>() {
                Ok(code) => Self {
                    code: Some(code),
                    message: rest.to_owned(),
                },
                Err(_) => Self {
                    code: None,
                    message: data.to_owned(),
                },
            },
            None => Self {
                code: None,
                message: data.to_owned(),
            },
        }
    }

    /// Check if the status code is in the range [200, 300).
    pub fn is_successful(&self) -> bool {
        self.code.is_some_and(|c| (200..300).contains(&c))
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl Serialize for ResponseStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResponseStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

// ── Header and Message ──────────────────────────────────────────────

/// The LEAP message header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "StatusCode", skip_serializing_if = "Option::is_none", default)]
    pub status: Option<ResponseStatus>,

    #[serde(rename = "Url", skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,

    #[serde(
        rename = "MessageBodyType",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub message_body_type: Option<String>,

    #[serde(rename = "ClientTag", skip_serializing_if = "Option::is_none", default)]
    pub client_tag: Option<String>,
}

/// A complete LEAP message: request, response, or unsolicited notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "CommuniqueType")]
    pub communique_type: CommuniqueType,

    #[serde(rename = "Header", default)]
    pub header: Header,

    #[serde(rename = "Body", skip_serializing_if = "Option::is_none", default)]
    pub body: Option<serde_json::Value>,
}

impl Message {
    /// Build an outbound request with a client-assigned tag.
    pub fn request(
        communique_type: CommuniqueType,
        url: impl Into<String>,
        tag: impl Into<String>,
        body: Option<serde_json::Value>,
    ) -> Self {
        Self {
            communique_type,
            header: Header {
                url: Some(url.into()),
                client_tag: Some(tag.into()),
                ..Header::default()
            },
            body,
        }
    }

    /// The header URL, or `""` when absent.
    pub fn url(&self) -> &str {
        self.header.url.as_deref().unwrap_or("")
    }
}

// ── Href helpers ────────────────────────────────────────────────────

/// Extract the entity id from a bridge href.
///
/// The id is the final all-digit path segment, so both `/device/12` and
/// `/device/8/buttongroup/2/button/12/status/event` resolve to `12`.
pub fn id_from_href(href: &str) -> Result<u32, Error> {
    href.split('/')
        .rev()
        .find(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|segment| segment.parse().ok())
        .ok_or_else(|| Error::Decode {
            raw: href.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_from_simple_href() {
        assert_eq!(id_from_href("/device/12").unwrap(), 12);
        assert_eq!(id_from_href("/zone/3/status").unwrap(), 3);
    }

    #[test]
    fn id_from_nested_href() {
        let href = "/device/8/buttongroup/2/button/12/status/event";
        assert_eq!(id_from_href(href).unwrap(), 12);
    }

    #[test]
    fn id_from_href_without_digits() {
        assert!(id_from_href("/project").is_err());
        assert!(id_from_href("").is_err());
    }

    #[test]
    fn status_parses_code_and_message() {
        let status = ResponseStatus::parse("200 OK");
        assert_eq!(status.code, Some(200));
        assert_eq!(status.message, "OK");
        assert!(status.is_successful());
    }

    #[test]
    fn status_without_code() {
        let status = ResponseStatus::parse("NoContent");
        assert_eq!(status.code, None);
        assert!(!status.is_successful());
    }

    #[test]
    fn status_with_unparseable_code() {
        let status = ResponseStatus::parse("abc def");
        assert_eq!(status.code, None);
        assert_eq!(status.message, "abc def");
    }

    #[test]
    fn status_roundtrips_through_display() {
        let status = ResponseStatus::parse("201 Created");
        assert_eq!(status.to_string(), "201 Created");
        assert_eq!(ResponseStatus::parse(&status.to_string()), status);
    }

    #[test]
    fn message_roundtrips_canonically() {
        let raw = json!({
            "CommuniqueType": "ReadResponse",
            "Header": {
                "StatusCode": "200 OK",
                "Url": "/device",
                "MessageBodyType": "MultipleDeviceDefinition",
                "ClientTag": "3"
            },
            "Body": {"Devices": []}
        });

        let message: Message = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(message.communique_type, CommuniqueType::ReadResponse);
        assert_eq!(message.header.status, Some(ResponseStatus::new(200, "OK")));

        let reencoded = serde_json::to_value(&message).unwrap();
        assert_eq!(reencoded, raw);

        let redecoded: Message = serde_json::from_value(reencoded).unwrap();
        assert_eq!(redecoded, message);
    }

    #[test]
    fn request_skips_empty_fields() {
        let message = Message::request(CommuniqueType::ReadRequest, "/area", "1", None);
        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(
            encoded,
            json!({
                "CommuniqueType": "ReadRequest",
                "Header": {"Url": "/area", "ClientTag": "1"}
            })
        );
    }
}
