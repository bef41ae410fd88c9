use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GatewayLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Partial gateway update applied by the writer. A row is created on
/// first sighting and mutated on every upsert; fields left `None` keep
/// their stored value. Retention governs packets, never gateways.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayUpsert {
    pub gateway_id: String,
    pub name: Option<String>,
    pub alias: Option<String>,
    pub group_name: Option<String>,
    pub location: Option<GatewayLocation>,
}

impl GatewayUpsert {
    pub fn sighting(gateway_id: impl Into<String>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            ..Default::default()
        }
    }
}
