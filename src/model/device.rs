use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upsert payload for `cs_devices`, one row per DevEUI seen on the
/// application bus; `packet_count` is incremented on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsDeviceUpsert {
    pub dev_eui: String,
    pub dev_addr: Option<String>,
    pub device_name: String,
    pub application_id: String,
    pub application_name: Option<String>,
    pub last_seen: DateTime<Utc>,
}
