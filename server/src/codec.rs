//! Line-delimited JSON envelope framing.
//!
//! One logical message is one newline-terminated UTF-8 line containing
//! `{"type": <string>, "data": <object>}`. Anything that doesn't fit that
//! shape is a [`ProtocolViolation`], which the connection handles by logging
//! a warning and closing rather than propagating as a hard I/O error.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolViolation {
    #[error("malformed json: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("top-level message was not a json object")]
    NotAnObject,
    #[error("message missing required \"type\" key")]
    MissingType,
    #[error("message missing required \"data\" key")]
    MissingData,
    #[error("unknown message type \"{0}\"")]
    UnknownType(String),
    #[error("message type \"{msg_type}\" missing required field \"{field}\"")]
    MissingField { msg_type: String, field: String },
}

/// A parsed but not-yet-dispatched inbound message.
pub struct Envelope {
    pub msg_type: String,
    pub data: Value,
}

/// Parse one line of input into an [`Envelope`].
///
/// `known_types` is consulted so that an unknown `type` is reported as a
/// protocol violation at parse time, rather than bubbling up as a
/// harder-to-diagnose "no handler" error later in dispatch.
pub fn decode_line(line: &str, known_types: &[&str]) -> Result<Envelope, ProtocolViolation> {
    let value: Value = serde_json::from_str(line)?;
    let obj = value.as_object().ok_or(ProtocolViolation::NotAnObject)?;

    let msg_type = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolViolation::MissingType)?
        .to_string();

    let data = obj.get("data").ok_or(ProtocolViolation::MissingData)?.clone();

    if !known_types.contains(&msg_type.as_str()) {
        return Err(ProtocolViolation::UnknownType(msg_type));
    }

    Ok(Envelope { msg_type, data })
}

/// Deserialize an envelope's `data` into `T`, translating a missing/invalid
/// field into a [`ProtocolViolation`] tagged with the offending message type.
pub fn decode_data<T: serde::de::DeserializeOwned>(
    envelope: &Envelope,
) -> Result<T, ProtocolViolation> {
    serde_json::from_value(envelope.data.clone()).map_err(|_| ProtocolViolation::MissingField {
        msg_type: envelope.msg_type.clone(),
        field: "data".to_string(),
    })
}

/// Serialize an outbound `{type, data}` message to a single line, newline
/// included, ready to be written straight to the socket.
pub fn encode_line(msg_type: &str, data: &impl Serialize) -> String {
    #[derive(Serialize)]
    struct Outbound<'a, T> {
        #[serde(rename = "type")]
        msg_type: &'a str,
        data: T,
    }
    let mut line = serde_json::to_string(&Outbound { msg_type, data }).expect("outbound messages are always serializable");
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    const KNOWN: &[&str] = &["ping"];

    #[derive(Deserialize, PartialEq, Debug)]
    struct Ping {
        n: u32,
    }

    #[test]
    fn decodes_well_formed_line() {
        let env = decode_line(r#"{"type":"ping","data":{"n":1}}"#, KNOWN).unwrap();
        assert_eq!(env.msg_type, "ping");
        let data: Ping = decode_data(&env).unwrap();
        assert_eq!(data, Ping { n: 1 });
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            decode_line("{not json", KNOWN),
            Err(ProtocolViolation::MalformedJson(_))
        ));
    }

    #[test]
    fn rejects_non_object_top_level() {
        assert!(matches!(
            decode_line("[1,2,3]", KNOWN),
            Err(ProtocolViolation::NotAnObject)
        ));
    }

    #[test]
    fn rejects_missing_type() {
        assert!(matches!(
            decode_line(r#"{"data":{}}"#, KNOWN),
            Err(ProtocolViolation::MissingType)
        ));
    }

    #[test]
    fn rejects_missing_data() {
        assert!(matches!(
            decode_line(r#"{"type":"ping"}"#, KNOWN),
            Err(ProtocolViolation::MissingData)
        ));
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(matches!(
            decode_line(r#"{"type":"bogus","data":{}}"#, KNOWN),
            Err(ProtocolViolation::UnknownType(t)) if t == "bogus"
        ));
    }

    #[test]
    fn rejects_missing_required_subkey() {
        let env = decode_line(r#"{"type":"ping","data":{}}"#, KNOWN).unwrap();
        assert!(decode_data::<Ping>(&env).is_err());
    }

    #[test]
    fn encode_line_is_newline_terminated() {
        let line = encode_line("ping", &Ping { n: 7 });
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
    }
}
