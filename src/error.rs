use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("MQTT connection error: {0}")]
    Mqtt(String),

    #[error("malformed PHYPayload: {0}")]
    MalformedPhy(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("unsupported protobuf wire type: {0}")]
    UnsupportedWireType(u8),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;
