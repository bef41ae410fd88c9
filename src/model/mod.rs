pub mod device;
pub mod gateway;
pub mod packet;

pub use device::CsDeviceUpsert;
pub use gateway::{GatewayLocation, GatewayUpsert};
pub use packet::{CsPacket, LivePacket, PacketType, ParsedPacket};
