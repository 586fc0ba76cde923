// BLOB version prefix helpers for persisted aggregates. [version: u8][wincode payload].

use crate::error::StoreError;
use crate::models::AggregatePayload;

pub(super) const AGGREGATE_BLOB_VERSION: u8 = 1;

fn with_version_prefix(version: u8, payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(version);
    out.extend_from_slice(&payload);
    out
}

pub(super) fn blob_version(bytes: &[u8]) -> u8 {
    if bytes.is_empty() { 0 } else { bytes[0] }
}

pub(super) fn encode_payload(payload: &AggregatePayload) -> Result<Vec<u8>, StoreError> {
    let body = wincode::serialize(payload).map_err(|e| StoreError::Codec(format!("wincode: {}", e)))?;
    Ok(with_version_prefix(AGGREGATE_BLOB_VERSION, body))
}

pub(super) fn decode_payload(bytes: &[u8]) -> Result<AggregatePayload, StoreError> {
    match blob_version(bytes) {
        AGGREGATE_BLOB_VERSION => wincode::deserialize(&bytes[1..])
            .map_err(|e| StoreError::Codec(format!("wincode deserialize aggregate: {}", e))),
        other => Err(StoreError::Codec(format!(
            "unsupported aggregate blob version {}",
            other
        ))),
    }
}
