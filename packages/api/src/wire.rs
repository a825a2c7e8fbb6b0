//! Wire-level request, response, and literal shapes.
//!
//! Everything here is plain JSON via serde. Field names are capitalized on
//! the wire (`Op`, `Path`, `Ok`, ...); optional fields are omitted when
//! absent. `WireFrame` is the duplex union: a frame carrying `Op` is a
//! request, a frame without one is a response.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entry::Entry;

/// The JSON-serializable form of an Entry.
///
/// Every field is optional so that partially-formed literals can be decoded
/// and degraded to `Error` entries instead of failing the whole frame.
/// Extension types (e.g. the reversal `Device` shape) put their additional
/// fields in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WireLiteral {
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub literal_type: Option<String>,
    #[serde(
        rename = "StringValue",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub string_value: Option<String>,
    #[serde(rename = "Mime", default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(rename = "Data", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(rename = "Code", default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(rename = "Authority", default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    #[serde(rename = "Children", default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<WireLiteral>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl WireLiteral {
    /// A bare literal carrying only a `Type` tag.
    pub fn of_type(literal_type: impl Into<String>) -> Self {
        WireLiteral {
            literal_type: Some(literal_type.into()),
            ..Default::default()
        }
    }

    /// Read an extension field as a string.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}

/// One operation request on the wire.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    #[serde(rename = "Op")]
    pub op: String,
    #[serde(rename = "Path", default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(rename = "Dest", default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
    #[serde(rename = "Input", default, skip_serializing_if = "Option::is_none")]
    pub input: Option<WireLiteral>,
    #[serde(rename = "Depth", default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
}

/// One response frame on the wire. Also carries channel packets: a frame
/// with `Chan` and a `Next`/`Error`/`Done` status belongs to that channel
/// rather than to the request/response pairing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    #[serde(rename = "Ok")]
    pub ok: bool,
    #[serde(rename = "Output", default, skip_serializing_if = "Option::is_none")]
    pub output: Option<WireLiteral>,
    #[serde(rename = "Chan", default, skip_serializing_if = "Option::is_none")]
    pub chan: Option<u64>,
    #[serde(rename = "Status", default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl WireResponse {
    pub fn ok_empty() -> Self {
        WireResponse {
            ok: true,
            output: None,
            chan: None,
            status: None,
        }
    }

    pub fn ok_output(output: WireLiteral) -> Self {
        WireResponse {
            ok: true,
            output: Some(output),
            chan: None,
            status: None,
        }
    }

    /// The `Ok: false` envelope: a String entry named `error-message`.
    pub fn failure(message: impl Into<String>) -> Self {
        WireResponse {
            ok: false,
            output: Some(WireLiteral {
                literal_type: Some("String".to_string()),
                name: Some("error-message".to_string()),
                string_value: Some(message.into()),
                ..Default::default()
            }),
            chan: None,
            status: None,
        }
    }
}

/// A frame read off a duplex connection, before we know its direction.
///
/// Deserialization tries the request shape first, so the presence of `Op`
/// decides: with it the frame is a request, without it a response. This is
/// the dispatch rule the reversal extension relies on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireFrame {
    Request(WireRequest),
    Response(WireResponse),
}

impl WireFrame {
    pub fn as_request(&self) -> Option<&WireRequest> {
        match self {
            WireFrame::Request(r) => Some(r),
            WireFrame::Response(_) => None,
        }
    }

    pub fn as_response(&self) -> Option<&WireResponse> {
        match self {
            WireFrame::Request(_) => None,
            WireFrame::Response(r) => Some(r),
        }
    }
}

impl From<WireRequest> for WireFrame {
    fn from(r: WireRequest) -> Self {
        WireFrame::Request(r)
    }
}

impl From<WireResponse> for WireFrame {
    fn from(r: WireResponse) -> Self {
        WireFrame::Response(r)
    }
}

/// Outbound sink for one duplex connection: responses, channel packets,
/// and reversed requests all leave through it, in send order.
pub type FrameSink = tokio::sync::mpsc::UnboundedSender<WireFrame>;

/// A request whose Input has been inflated into the Entry model.
#[derive(Clone, Debug, Default)]
pub struct Request {
    pub op: String,
    pub path: Option<String>,
    pub dest: Option<String>,
    pub input: Option<Entry>,
    pub depth: Option<u32>,
}

impl Request {
    pub fn new(op: impl Into<String>) -> Self {
        Request {
            op: op.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_dest(mut self, dest: impl Into<String>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    #[must_use]
    pub fn with_input(mut self, input: Entry) -> Self {
        self.input = Some(input);
        self
    }

    #[must_use]
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }
}

/// A response whose Output has been inflated into the Entry model.
#[derive(Clone, Debug)]
pub struct Response {
    pub ok: bool,
    pub output: Option<Entry>,
    pub status: Option<String>,
}
