//! Minimal JSON:API document reading.
//!
//! Resources are flattened into a single object holding the `attributes`
//! members plus `id`, which is what the record types deserialize from.

use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{Map, Value};

use super::{PlayerError, PlayerErrorCode};

#[derive(Debug, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub id: Value,
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData {
    Many(Vec<Resource>),
    One(Resource),
}

#[derive(Debug, Deserialize)]
pub struct Payload {
    pub data: PrimaryData,
}

fn payload_error(message: String) -> PlayerError {
    PlayerError::new_code(PlayerErrorCode::Payload, message)
}

impl Resource {
    pub fn id_string(&self) -> Option<String> {
        match &self.id {
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    pub fn flatten(&self) -> Map<String, Value> {
        let mut flat = self.attributes.clone();
        if let Some(id) = self.id_string() {
            flat.insert("id".to_string(), Value::String(id));
        }
        flat
    }

    pub fn into_record<T: DeserializeOwned>(&self) -> Result<T, PlayerError> {
        serde_json::from_value(Value::Object(self.flatten())).map_err(|err| {
            payload_error(format!(
                "resource {} of type {}: {}",
                self.id_string().unwrap_or_default(),
                self.resource_type.as_deref().unwrap_or("?"),
                err
            ))
        })
    }
}

impl Payload {
    pub fn parse(body: &[u8]) -> Result<Payload, PlayerError> {
        serde_json::from_slice(body).map_err(|err| payload_error(format!("invalid payload: {}", err)))
    }

    pub fn one(self) -> Result<Resource, PlayerError> {
        match self.data {
            PrimaryData::One(resource) => Ok(resource),
            PrimaryData::Many(mut resources) if resources.len() == 1 => Ok(resources.remove(0)),
            PrimaryData::Many(resources) => Err(payload_error(format!(
                "expected one resource, got {}",
                resources.len()
            ))),
        }
    }

    pub fn many(self) -> Vec<Resource> {
        match self.data {
            PrimaryData::One(resource) => vec![resource],
            PrimaryData::Many(resources) => resources,
        }
    }
}

/// Reads a body that is either a JSON:API document or a plain object,
/// optionally wrapped in a single named member such as `{"config": {...}}`.
pub fn parse_flat_object(body: &[u8], wrapper: &str) -> Result<Map<String, Value>, PlayerError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| payload_error(format!("invalid payload: {}", err)))?;
    let Value::Object(mut object) = value else {
        return Err(payload_error("expected a JSON object".to_string()));
    };
    if object.contains_key("data") {
        let payload: Payload = serde_json::from_value(Value::Object(object))
            .map_err(|err| payload_error(format!("invalid payload: {}", err)))?;
        return Ok(payload.one()?.flatten());
    }
    match object.remove(wrapper) {
        Some(Value::Object(inner)) => Ok(inner),
        Some(_) => Err(payload_error(format!("member {} is not an object", wrapper))),
        None => Ok(object),
    }
}
