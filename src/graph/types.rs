use crate::errors::GraphMetaError;

pub fn validate_label(label: &str) -> Result<(), GraphMetaError> {
    if label.trim().is_empty() {
        return Err(GraphMetaError::invalid_input("label must be set"));
    }
    Ok(())
}

pub fn validate_property_key(key: &str) -> Result<(), GraphMetaError> {
    if key.trim().is_empty() {
        return Err(GraphMetaError::invalid_input("property key must be set"));
    }
    Ok(())
}

pub fn validate_edge(from_id: i64, to_id: i64, edge_type: &str) -> Result<(), GraphMetaError> {
    if edge_type.trim().is_empty() {
        return Err(GraphMetaError::invalid_input("edge type must be set"));
    }
    if from_id <= 0 || to_id <= 0 {
        return Err(GraphMetaError::invalid_input(
            "edge endpoints must be positive ids",
        ));
    }
    Ok(())
}

pub fn decode_value(raw: &str) -> Result<serde_json::Value, GraphMetaError> {
    serde_json::from_str(raw).map_err(|e| GraphMetaError::query(e.to_string()))
}

pub fn encode_value(value: &serde_json::Value) -> Result<String, GraphMetaError> {
    serde_json::to_string(value).map_err(|e| GraphMetaError::encode(e.to_string()))
}
