pub mod command;
pub mod instances;
pub mod restart;
pub mod update;

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use crate::error::FleetError;

/// 빈 본문은 기본값, 깨진 JSON은 구조화된 에러
pub(crate) fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, FleetError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| FleetError::InvalidRequest(format!("malformed body: {}", e)))
}

/// `{Success:true}`를 덧붙인 직렬화 결과
pub(crate) fn success_with<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, FleetError> {
    let mut json = serde_json::to_value(value).map_err(|e| FleetError::Internal(e.into()))?;
    if let Some(obj) = json.as_object_mut() {
        obj.insert("Success".to_string(), serde_json::Value::Bool(true));
    }
    Ok(json)
}
