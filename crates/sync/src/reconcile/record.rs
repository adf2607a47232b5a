// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ingestion of cached records in their legacy shapes.
//!
//! Older writers stored the referenced platform id nested (`contact.id`),
//! flat (`contactId`), or as a list (`contactIds`), sometimes several at once.
//! All of them are unioned here so nothing downstream has to care.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::Value;

use crate::store::CachedRecord;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record must be a JSON object")]
    NotAnObject,
    #[error("invalid record: {0}")]
    Invalid(#[from] serde_json::Error),
}

#[derive(Debug, Default, Deserialize)]
struct RawRecord {
    #[serde(default, alias = "_id", alias = "recordId")]
    id: Value,
    #[serde(default, rename = "groupKey", alias = "group_key", alias = "groupId")]
    group_key: Value,
    #[serde(default)]
    contact: Value,
    #[serde(default, rename = "contactId", alias = "contact_id")]
    contact_id: Value,
    #[serde(default, rename = "contactIds", alias = "contact_ids")]
    contact_ids: Value,
    #[serde(default)]
    contacts: Value,
}

/// A string or numeric key, trimmed. Anything else counts as absent.
fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_owned()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Collect ids from a string, a number, an `{id}` object, or an array of those.
fn collect_ids(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() {
                out.insert(s.to_owned());
            }
        }
        Value::Number(n) => {
            out.insert(n.to_string());
        }
        Value::Array(items) => items.iter().for_each(|v| collect_ids(v, out)),
        Value::Object(map) => {
            if let Some(id) = map.get("id").or_else(|| map.get("_id")) {
                collect_ids(id, out);
            }
        }
        Value::Null | Value::Bool(_) => {}
    }
}

fn parse_raw(value: &Value) -> Result<RawRecord, RecordError> {
    if !value.is_object() {
        return Err(RecordError::NotAnObject);
    }
    Ok(RawRecord::deserialize(value)?)
}

fn union_ids(raw: &RawRecord) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    for shape in [&raw.contact, &raw.contact_id, &raw.contact_ids, &raw.contacts] {
        collect_ids(shape, &mut ids);
    }
    ids
}

/// Convert a legacy-shaped record into its canonical form.
///
/// A record without an id gets a fresh one.
pub fn canonicalize(sub_account_id: &str, value: &Value) -> Result<CachedRecord, RecordError> {
    let raw = parse_raw(value)?;
    let external_ids = union_ids(&raw);
    let id = scalar_key(&raw.id).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    Ok(CachedRecord {
        id,
        sub_account_id: sub_account_id.to_owned(),
        group_key: scalar_key(&raw.group_key),
        external_ids,
        reconcile_pending: false,
        reconcile_count: None,
    })
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
