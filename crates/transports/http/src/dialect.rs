//! Protocol dialects spoken with callers.
//!
//! Two request shapes share `POST /session`: the W3C envelope
//! (`capabilities.alwaysMatch` / `capabilities.firstMatch`) and the legacy
//! one (`desiredCapabilities`). A request must pick one; a body carrying
//! both is refused rather than guessed. The dialect chosen at creation
//! time shapes every reply for that session.

use serde_json::{json, Value};

use browsergrid_core::capabilities::Capabilities;
use browsergrid_core::distributor::NewSessionRequest;
use browsergrid_core::error::Error;
use browsergrid_core::session::{Dialect, Session};

/// Parse a `POST /session` body into a placement request.
pub fn parse_new_session(body: &[u8]) -> Result<NewSessionRequest, Error> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::InvalidArgument(format!("malformed request body: {e}")))?;
    let Value::Object(root) = value else {
        return Err(Error::InvalidArgument(
            "request body must be a JSON object".to_string(),
        ));
    };

    match (root.get("capabilities"), root.get("desiredCapabilities")) {
        (Some(_), Some(_)) => Err(Error::InvalidArgument(
            "both capabilities and desiredCapabilities supplied; pick one dialect".to_string(),
        )),
        (Some(caps), None) => parse_w3c(caps),
        (None, Some(caps)) => parse_legacy(caps),
        (None, None) => Err(Error::InvalidArgument(
            "request carries neither capabilities nor desiredCapabilities".to_string(),
        )),
    }
}

fn parse_w3c(caps: &Value) -> Result<NewSessionRequest, Error> {
    let Value::Object(caps) = caps else {
        return Err(Error::InvalidArgument(
            "capabilities must be a JSON object".to_string(),
        ));
    };
    let always_match = match caps.get("alwaysMatch") {
        Some(value) => Capabilities::from_value(value.clone())?,
        None => Capabilities::new(),
    };
    let first_match = match caps.get("firstMatch") {
        Some(Value::Array(alternatives)) => {
            let mut parsed = Vec::with_capacity(alternatives.len());
            for alternative in alternatives {
                parsed.push(Capabilities::from_value(alternative.clone())?);
            }
            parsed
        }
        Some(_) => {
            return Err(Error::InvalidArgument(
                "firstMatch must be an array of objects".to_string(),
            ))
        }
        None => Vec::new(),
    };
    Ok(NewSessionRequest {
        always_match,
        first_match,
        dialect: Dialect::W3c,
    })
}

fn parse_legacy(caps: &Value) -> Result<NewSessionRequest, Error> {
    Ok(NewSessionRequest {
        always_match: Capabilities::from_value(caps.clone())?,
        first_match: Vec::new(),
        dialect: Dialect::Legacy,
    })
}

/// Success reply for a created session.
pub fn created_body(session: &Session) -> Value {
    match session.dialect {
        Dialect::W3c => json!({
            "value": {
                "sessionId": session.session_id,
                "capabilities": session.capabilities,
            }
        }),
        Dialect::Legacy => json!({
            "status": 0,
            "sessionId": session.session_id,
            "value": session.capabilities,
        }),
    }
}

/// Success reply for a deleted session.
pub fn deleted_body(dialect: Dialect) -> Value {
    match dialect {
        Dialect::W3c => json!({ "value": null }),
        Dialect::Legacy => json!({ "status": 0, "value": null }),
    }
}

/// The W3C error slug for an error kind.
pub fn error_slug(error: &Error) -> &'static str {
    match error {
        Error::SessionNotCreated(_) => "session not created",
        Error::NoSuchSession(_) => "invalid session id",
        Error::InvalidArgument(_) => "invalid argument",
        Error::Timeout(_) => "timeout",
        _ => "unknown error",
    }
}

/// The downstream HTTP status for an error kind.
pub fn error_status(error: &Error) -> u16 {
    match error {
        Error::InvalidArgument(_) => 400,
        Error::NoSuchSession(_) => 404,
        _ => 500,
    }
}

/// The numeric status the legacy protocol expects in failure bodies.
fn legacy_status(error: &Error) -> i64 {
    match error {
        Error::SessionNotCreated(_) => 33,
        Error::NoSuchSession(_) => 6,
        Error::Timeout(_) => 21,
        _ => 13,
    }
}

/// Failure reply in the given dialect.
pub fn error_body(error: &Error, dialect: Dialect) -> Value {
    match dialect {
        Dialect::W3c => json!({
            "value": {
                "error": error_slug(error),
                "message": error.to_string(),
                "stacktrace": "",
            }
        }),
        Dialect::Legacy => json!({
            "status": legacy_status(error),
            "value": { "message": error.to_string() },
        }),
    }
}
