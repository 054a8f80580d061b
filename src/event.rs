//! # Event Envelope
//!
//! Immutable CloudEvents envelope carried from the ingress to the decouple
//! sink. Decodes both HTTP content modes:
//!
//! - **binary**: context attributes in `ce-*` headers, payload in the body
//! - **structured**: `application/cloudevents+json` body with `data` or
//!   `data_base64`
//!
//! After decoding, the only permitted mutation is the injected arrival-time
//! extension ([`EVENT_ARRIVAL_TIME`]).

use axum::http::HeaderMap;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Extension attribute stamped on every event at ingress with the wall-clock
/// arrival time, RFC3339. Used downstream to measure broker dwell time.
pub const EVENT_ARRIVAL_TIME: &str = "knativearrivaltime";

const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json";

/// Why an inbound request could not be decoded into an event.
#[derive(Debug, Error)]
pub enum EventDecodeError {
    /// Neither binary nor structured CloudEvents encoding. Not an event.
    #[error("encoding is unknown; not a cloud event?")]
    UnknownEncoding,
    #[error("missing required attribute {0:?}")]
    MissingAttribute(&'static str),
    #[error("malformed event: {0}")]
    Malformed(String),
}

/// A decoded CloudEvent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    id: String,
    source: String,
    ty: String,
    spec_version: String,
    data_content_type: Option<String>,
    extensions: BTreeMap<String, String>,
    data: Vec<u8>,
}

impl Event {
    /// Decodes an event from an HTTP request's headers and body, picking the
    /// content mode from the self-describing encoding.
    pub fn from_http(headers: &HeaderMap, body: &[u8]) -> Result<Self, EventDecodeError> {
        if headers.contains_key("ce-specversion") {
            return Self::from_binary(headers, body);
        }
        let content_type = header_str(headers, "content-type")?.unwrap_or_default();
        if content_type
            .to_ascii_lowercase()
            .starts_with(STRUCTURED_CONTENT_TYPE)
        {
            return Self::from_structured(body);
        }
        Err(EventDecodeError::UnknownEncoding)
    }

    fn from_binary(headers: &HeaderMap, body: &[u8]) -> Result<Self, EventDecodeError> {
        let required = |name: &'static str| -> Result<String, EventDecodeError> {
            header_str(headers, name)?
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(EventDecodeError::MissingAttribute(name))
        };

        let mut extensions = BTreeMap::new();
        for (name, value) in headers {
            let name = name.as_str();
            if let Some(ext) = name.strip_prefix("ce-") {
                if !matches!(ext, "id" | "source" | "type" | "specversion") {
                    let value = value
                        .to_str()
                        .map_err(|e| EventDecodeError::Malformed(e.to_string()))?;
                    extensions.insert(ext.to_string(), value.to_string());
                }
            }
        }

        Ok(Self {
            id: required("ce-id")?,
            source: required("ce-source")?,
            ty: required("ce-type")?,
            spec_version: required("ce-specversion")?,
            data_content_type: header_str(headers, "content-type")?.map(str::to_string),
            extensions,
            data: body.to_vec(),
        })
    }

    fn from_structured(body: &[u8]) -> Result<Self, EventDecodeError> {
        #[derive(Deserialize)]
        struct Envelope {
            id: Option<String>,
            source: Option<String>,
            #[serde(rename = "type")]
            ty: Option<String>,
            specversion: Option<String>,
            datacontenttype: Option<String>,
            data: Option<Value>,
            data_base64: Option<String>,
            #[serde(flatten)]
            extensions: BTreeMap<String, Value>,
        }

        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|e| EventDecodeError::Malformed(e.to_string()))?;

        let required = |field: Option<String>, name: &'static str| {
            field
                .filter(|v| !v.is_empty())
                .ok_or(EventDecodeError::MissingAttribute(name))
        };

        let data = match (envelope.data_base64, envelope.data) {
            (Some(b64), _) => general_purpose::STANDARD
                .decode(b64)
                .map_err(|e| EventDecodeError::Malformed(e.to_string()))?,
            (None, Some(Value::String(s))) => s.into_bytes(),
            (None, Some(value)) => serde_json::to_vec(&value)
                .map_err(|e| EventDecodeError::Malformed(e.to_string()))?,
            (None, None) => Vec::new(),
        };

        // Only scalar extension attributes survive; nested values are not
        // valid CloudEvents context attributes.
        let extensions = envelope
            .extensions
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k, s)),
                Value::Bool(b) => Some((k, b.to_string())),
                Value::Number(n) => Some((k, n.to_string())),
                _ => None,
            })
            .collect();

        Ok(Self {
            id: required(envelope.id, "id")?,
            source: required(envelope.source, "source")?,
            ty: required(envelope.ty, "type")?,
            spec_version: required(envelope.specversion, "specversion")?,
            data_content_type: envelope.datacontenttype,
            extensions,
            data,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn ty(&self) -> &str {
        &self.ty
    }

    #[must_use]
    pub fn spec_version(&self) -> &str {
        &self.spec_version
    }

    #[must_use]
    pub fn data_content_type(&self) -> Option<&str> {
        self.data_content_type.as_deref()
    }

    #[must_use]
    pub fn extension(&self, name: &str) -> Option<&str> {
        self.extensions.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Sets an extension attribute. The arrival-time stamp at ingress is the
    /// only write the pipeline performs after decode.
    pub fn set_extension(&mut self, name: &str, value: &str) {
        self.extensions.insert(name.to_string(), value.to_string());
    }

    /// Context attributes flattened into a string map for the backend wire
    /// format (binary-mode attribute names, extensions as-is).
    #[must_use]
    pub fn wire_attributes(&self) -> BTreeMap<String, String> {
        let mut attributes = BTreeMap::new();
        attributes.insert("ce-id".to_string(), self.id.clone());
        attributes.insert("ce-source".to_string(), self.source.clone());
        attributes.insert("ce-type".to_string(), self.ty.clone());
        attributes.insert("ce-specversion".to_string(), self.spec_version.clone());
        if let Some(ct) = &self.data_content_type {
            attributes.insert("content-type".to_string(), ct.clone());
        }
        for (name, value) in &self.extensions {
            attributes.insert(format!("ce-{name}"), value.clone());
        }
        attributes
    }
}

fn header_str<'a>(
    headers: &'a HeaderMap,
    name: &str,
) -> Result<Option<&'a str>, EventDecodeError> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map_err(|e| EventDecodeError::Malformed(e.to_string()))
        })
        .transpose()
}
