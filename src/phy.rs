//! LoRaWAN PHYPayload parsing.
//!
//! Decodes the MAC header and the typed fields the analyzer cares about
//! (DevAddr, FCnt, FPort, JoinEUI, DevEUI). Frame layout per LoRaWAN L2
//! 1.0.4, 4. MAC Frame Formats. The payload stays opaque; no MIC check,
//! no decryption.

use crate::error::AnalyzerError;

/// Message type from the top three MHDR bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MType {
    JoinRequest,
    JoinAccept,
    UnconfirmedDataUp,
    UnconfirmedDataDown,
    ConfirmedDataUp,
    ConfirmedDataDown,
    RejoinRequest,
    Proprietary,
}

impl MType {
    pub fn from_mhdr(mhdr: u8) -> Self {
        match mhdr >> 5 {
            0 => MType::JoinRequest,
            1 => MType::JoinAccept,
            2 => MType::UnconfirmedDataUp,
            3 => MType::UnconfirmedDataDown,
            4 => MType::ConfirmedDataUp,
            5 => MType::ConfirmedDataDown,
            6 => MType::RejoinRequest,
            _ => MType::Proprietary,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(
            self,
            MType::UnconfirmedDataUp
                | MType::ConfirmedDataUp
                | MType::UnconfirmedDataDown
                | MType::ConfirmedDataDown
        )
    }

    pub fn is_data_down(&self) -> bool {
        matches!(self, MType::UnconfirmedDataDown | MType::ConfirmedDataDown)
    }

    /// Tri-state confirmed flag: `None` for non-data frames.
    pub fn confirmed(&self) -> Option<bool> {
        match self {
            MType::ConfirmedDataUp | MType::ConfirmedDataDown => Some(true),
            MType::UnconfirmedDataUp | MType::UnconfirmedDataDown => Some(false),
            _ => None,
        }
    }
}

/// Typed fields extracted from a PHYPayload.
#[derive(Debug, Clone, PartialEq)]
pub struct PhyFrame {
    pub mtype: MType,
    pub dev_addr: Option<String>,
    pub f_cnt: Option<u32>,
    pub f_port: Option<u8>,
    pub join_eui: Option<String>,
    pub dev_eui: Option<String>,
    pub confirmed: Option<bool>,
}

impl PhyFrame {
    fn bare(mtype: MType) -> Self {
        Self {
            mtype,
            dev_addr: None,
            f_cnt: None,
            f_port: None,
            join_eui: None,
            dev_eui: None,
            confirmed: mtype.confirmed(),
        }
    }
}

// MHDR + DevAddr + FCtrl + FCnt + MIC
const DATA_FRAME_MIN: usize = 1 + 4 + 1 + 2 + 4;
// MHDR + JoinEUI + DevEUI + DevNonce + MIC
const JOIN_REQUEST_LEN: usize = 1 + 8 + 8 + 2 + 4;

/// Render little-endian wire bytes as an uppercase big-endian hex string.
fn eui_hex(bytes: &[u8]) -> String {
    let reversed: Vec<u8> = bytes.iter().rev().copied().collect();
    hex::encode_upper(reversed)
}

/// Parse a raw PHYPayload into its typed fields.
///
/// Fails with [`AnalyzerError::MalformedPhy`] when the buffer is shorter
/// than the message type requires; callers drop the event silently.
pub fn parse_phy(bytes: &[u8]) -> Result<PhyFrame, AnalyzerError> {
    let mhdr = *bytes
        .first()
        .ok_or_else(|| AnalyzerError::MalformedPhy("empty buffer".to_string()))?;
    let mtype = MType::from_mhdr(mhdr);

    match mtype {
        MType::JoinRequest => parse_join_request(bytes),
        t if t.is_data() => parse_data_frame(bytes, t),
        t => Ok(PhyFrame::bare(t)),
    }
}

fn parse_join_request(bytes: &[u8]) -> Result<PhyFrame, AnalyzerError> {
    if bytes.len() < JOIN_REQUEST_LEN {
        return Err(AnalyzerError::MalformedPhy(format!(
            "join request needs {} bytes, got {}",
            JOIN_REQUEST_LEN,
            bytes.len()
        )));
    }

    let mut frame = PhyFrame::bare(MType::JoinRequest);
    frame.join_eui = Some(eui_hex(&bytes[1..9]));
    frame.dev_eui = Some(eui_hex(&bytes[9..17]));
    Ok(frame)
}

fn parse_data_frame(bytes: &[u8], mtype: MType) -> Result<PhyFrame, AnalyzerError> {
    if bytes.len() < DATA_FRAME_MIN {
        return Err(AnalyzerError::MalformedPhy(format!(
            "data frame needs at least {} bytes, got {}",
            DATA_FRAME_MIN,
            bytes.len()
        )));
    }

    let mut frame = PhyFrame::bare(mtype);
    frame.dev_addr = Some(eui_hex(&bytes[1..5]));

    let f_ctrl = bytes[5];
    let f_opts_len = (f_ctrl & 0x0F) as usize;
    frame.f_cnt = Some(u16::from_le_bytes([bytes[6], bytes[7]]) as u32);

    // FPort is present only when at least one byte sits between FOpts and
    // the trailing MIC.
    let f_port_pos = 8 + f_opts_len;
    if bytes.len() < f_port_pos + 4 {
        return Err(AnalyzerError::MalformedPhy(format!(
            "FOpts length {} overruns a {}-byte frame",
            f_opts_len,
            bytes.len()
        )));
    }
    if bytes.len() > f_port_pos + 4 {
        frame.f_port = Some(bytes[f_port_pos]);
    }

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_up(dev_addr: [u8; 4], f_cnt: u16, f_port: Option<u8>, confirmed: bool) -> Vec<u8> {
        let mhdr = if confirmed { 0x80 } else { 0x40 };
        let mut buf = vec![mhdr];
        buf.extend_from_slice(&dev_addr); // little-endian on the wire
        buf.push(0x00); // FCtrl, no FOpts
        buf.extend_from_slice(&f_cnt.to_le_bytes());
        if let Some(port) = f_port {
            buf.push(port);
            buf.extend_from_slice(&[0xDE, 0xAD]); // FRMPayload
        }
        buf.extend_from_slice(&[0; 4]); // MIC
        buf
    }

    #[test]
    fn test_parse_unconfirmed_data_up() {
        let bytes = data_up([0xAB, 0x1A, 0x01, 0x26], 1234, Some(10), false);
        let frame = parse_phy(&bytes).unwrap();

        assert_eq!(frame.mtype, MType::UnconfirmedDataUp);
        assert_eq!(frame.dev_addr.as_deref(), Some("26011AAB"));
        assert_eq!(frame.f_cnt, Some(1234));
        assert_eq!(frame.f_port, Some(10));
        assert_eq!(frame.confirmed, Some(false));
        assert!(frame.join_eui.is_none());
    }

    #[test]
    fn test_parse_confirmed_data_up() {
        let bytes = data_up([0x01, 0x00, 0x00, 0x26], 7, None, true);
        let frame = parse_phy(&bytes).unwrap();

        assert_eq!(frame.mtype, MType::ConfirmedDataUp);
        assert_eq!(frame.confirmed, Some(true));
        // No bytes between FOpts and MIC, so no FPort.
        assert_eq!(frame.f_port, None);
    }

    #[test]
    fn test_parse_data_down() {
        let mut bytes = data_up([0x44, 0x33, 0x22, 0x11], 9, Some(1), false);
        bytes[0] = 0x60; // UnconfirmedDataDown
        let frame = parse_phy(&bytes).unwrap();

        assert_eq!(frame.mtype, MType::UnconfirmedDataDown);
        assert_eq!(frame.dev_addr.as_deref(), Some("11223344"));
    }

    #[test]
    fn test_parse_join_request() {
        let mut buf = vec![0x00];
        // JoinEUI 70B3D57ED0000001, little-endian on the wire
        buf.extend_from_slice(&[0x01, 0x00, 0x00, 0xD0, 0x7E, 0xD5, 0xB3, 0x70]);
        // DevEUI 0004A30B001C0530
        buf.extend_from_slice(&[0x30, 0x05, 0x1C, 0x00, 0x0B, 0xA3, 0x04, 0x00]);
        buf.extend_from_slice(&[0x12, 0x34]); // DevNonce
        buf.extend_from_slice(&[0; 4]); // MIC

        let frame = parse_phy(&buf).unwrap();
        assert_eq!(frame.mtype, MType::JoinRequest);
        assert_eq!(frame.join_eui.as_deref(), Some("70B3D57ED0000001"));
        assert_eq!(frame.dev_eui.as_deref(), Some("0004A30B001C0530"));
        assert_eq!(frame.dev_addr, None);
        assert_eq!(frame.confirmed, None);
    }

    #[test]
    fn test_f_opts_shift_f_port() {
        let mut buf = vec![0x40];
        buf.extend_from_slice(&[0xAB, 0x1A, 0x01, 0x26]);
        buf.push(0x02); // FCtrl with FOptsLen = 2
        buf.extend_from_slice(&5u16.to_le_bytes());
        buf.extend_from_slice(&[0x02, 0x30]); // FOpts
        buf.push(42); // FPort
        buf.extend_from_slice(&[0x01]); // FRMPayload
        buf.extend_from_slice(&[0; 4]); // MIC

        let frame = parse_phy(&buf).unwrap();
        assert_eq!(frame.f_port, Some(42));
    }

    #[test]
    fn test_short_buffers_fail() {
        assert!(matches!(
            parse_phy(&[]),
            Err(AnalyzerError::MalformedPhy(_))
        ));
        assert!(matches!(
            parse_phy(&[0x40, 0x01, 0x02]),
            Err(AnalyzerError::MalformedPhy(_))
        ));
        // Join request one byte short.
        assert!(matches!(
            parse_phy(&vec![0x00; JOIN_REQUEST_LEN - 1]),
            Err(AnalyzerError::MalformedPhy(_))
        ));
        // FOptsLen pointing past the end.
        let mut buf = vec![0x40, 0, 0, 0, 0, 0x0F, 0, 0];
        buf.extend_from_slice(&[0; 4]);
        assert!(matches!(
            parse_phy(&buf),
            Err(AnalyzerError::MalformedPhy(_))
        ));
    }

    #[test]
    fn test_join_accept_and_proprietary_pass_through() {
        let frame = parse_phy(&[0x20, 0x01, 0x02]).unwrap();
        assert_eq!(frame.mtype, MType::JoinAccept);
        assert_eq!(frame.confirmed, None);

        let frame = parse_phy(&[0xE0]).unwrap();
        assert_eq!(frame.mtype, MType::Proprietary);
    }
}
