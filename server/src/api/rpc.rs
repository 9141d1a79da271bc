//! JSON operations on `POST /$/rpc`.
//!
//! A request is an object with an `operation` field and the operation's
//! arguments, e.g. `{"operation": "epoch", "datasource": "ds"}`. A
//! `datasource` argument is resolved by name, then id, then URI.

use serde_json::{Value, json};

use super::{ApiError, lookup};
use crate::registry::{DataRegistry, SourceDescription};

pub const OP_PING: &str = "ping";
pub const OP_EPOCH: &str = "epoch";
pub const OP_LIST_DATASOURCE: &str = "list_datasource";
pub const OP_DESCRIBE_DATASOURCE: &str = "describe_datasource";
pub const OP_DESCRIBE_LOG: &str = "describe_log";
pub const OP_CREATE_DATASOURCE: &str = "create_datasource";
pub const OP_REMOVE_DATASOURCE: &str = "remove_datasource";

/// Run one RPC request against `registry`.
pub fn dispatch(registry: &DataRegistry, request: &Value) -> Result<Value, ApiError> {
    let operation = required(request, "operation")?;
    tracing::debug!("rpc {operation}");
    match operation {
        OP_PING => Ok(json!({ "value": "pong" })),
        OP_EPOCH => {
            let source = lookup(registry, required(request, "datasource")?)?;
            Ok(json!(source.log().current_version()?.value()))
        }
        OP_LIST_DATASOURCE => {
            let sources: Vec<Value> = registry.list()?.iter().map(describe).collect();
            Ok(Value::Array(sources))
        }
        OP_DESCRIBE_DATASOURCE => {
            let source = lookup(registry, required(request, "datasource")?)?;
            Ok(describe(source.description()))
        }
        OP_DESCRIBE_LOG => {
            let source = lookup(registry, required(request, "datasource")?)?;
            let log = source.log();
            log.sync()?;
            Ok(json!({
                "name": source.name(),
                "earliest": log.earliest_version()?.value(),
                "latest": log.current_version()?.value(),
                "latest_id": log.current_id()?.map(|id| id.as_param()),
            }))
        }
        OP_CREATE_DATASOURCE => {
            let name = required(request, "name")?;
            let source = registry.create(
                name,
                optional(request, "uri")?,
                optional(request, "log_type")?,
            )?;
            Ok(describe(source.description()))
        }
        OP_REMOVE_DATASOURCE => {
            let source = lookup(registry, required(request, "datasource")?)?;
            registry.remove(source.id())?;
            Ok(json!({ "id": source.id().as_param() }))
        }
        other => Err(ApiError::BadRequest(format!("unknown operation: {other}"))),
    }
}

fn describe(description: &SourceDescription) -> Value {
    json!({
        "id": description.id.as_param(),
        "name": description.name,
        "uri": description.uri,
        "log_type": description.log_type,
    })
}

fn required<'a>(request: &'a Value, field: &str) -> Result<&'a str, ApiError> {
    optional(request, field)?
        .ok_or_else(|| ApiError::BadRequest(format!("missing field '{field}'")))
}

fn optional<'a>(request: &'a Value, field: &str) -> Result<Option<&'a str>, ApiError> {
    match request.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ApiError::BadRequest(format!("field '{field}' is not a string"))),
    }
}
