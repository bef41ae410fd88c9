//! LoRa time-on-air calculation.
//!
//! Formulas from "Semtech AN1200.13 LoRa Modem Designer's Guide", chapter 4.
//! Low-data-rate optimization thresholds per "LoRaWAN Regional Parameters
//! RP002-1.0.4", 4.1.2.

const PREAMBLE_SYMBOLS: f64 = 8.0;
const SYNC_WORD_SYMBOLS: f64 = 4.25;

/// Numeric coding-rate denominator offset: CR 4/5 -> 1 .. 4/8 -> 4.
///
/// Accepts the gateway-bridge string forms ("4/5", "CR_4_5") and falls
/// back to 4/5 for anything unrecognized.
pub fn coding_rate_value(code_rate: &str) -> u32 {
    match code_rate {
        "4/5" | "CR_4_5" | "CR45" => 1,
        "4/6" | "CR_4_6" | "CR46" => 2,
        "4/7" | "CR_4_7" | "CR47" => 3,
        "4/8" | "CR_4_8" | "CR48" => 4,
        _ => 1,
    }
}

/// Whether the low-data-rate optimizer is mandated for this SF/BW pair.
fn low_data_rate_optimize(sf: u8, bandwidth_hz: u32) -> bool {
    (bandwidth_hz == 125_000 && sf >= 11) || (bandwidth_hz == 250_000 && sf == 12)
}

/// Full-parameter time-on-air in microseconds.
///
/// `cr` is the coding-rate offset 1..=4, `explicit_header` enables the
/// PHY header term, `crc_on` the 16-bit payload CRC term.
pub fn airtime_us_with(
    sf: u8,
    bandwidth_hz: u32,
    payload_len: usize,
    cr: u32,
    explicit_header: bool,
    crc_on: bool,
    preamble_symbols: f64,
) -> i64 {
    if !(5..=12).contains(&sf) || bandwidth_hz == 0 {
        return 0;
    }

    let t_sym_us = (1u64 << sf) as f64 / bandwidth_hz as f64 * 1_000_000.0;

    let pl = payload_len as f64;
    let sf_f = sf as f64;
    let de = f64::from(low_data_rate_optimize(sf, bandwidth_hz));
    let h = f64::from(!explicit_header);
    let crc = f64::from(crc_on);

    let numerator = 8.0 * pl - 4.0 * sf_f + 28.0 + 16.0 * crc - 20.0 * h;
    let denominator = 4.0 * (sf_f - 2.0 * de);
    let payload_symbols = 8.0 + ((numerator / denominator).ceil() * (cr as f64 + 4.0)).max(0.0);

    let total_symbols = preamble_symbols + SYNC_WORD_SYMBOLS + payload_symbols;
    (t_sym_us * total_symbols).round() as i64
}

/// Time-on-air in microseconds with the analyzer defaults: explicit
/// header, payload CRC on, 8 preamble symbols, auto low-data-rate
/// optimization. Returns 0 when SF or bandwidth is unknown.
pub fn airtime_us(sf: Option<u8>, bandwidth_hz: u32, payload_len: usize, cr: u32) -> i64 {
    match sf {
        Some(sf) => airtime_us_with(sf, bandwidth_hz, payload_len, cr, true, true, PREAMBLE_SYMBOLS),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sf7_bw125_reference_value() {
        // Matches https://avbentem.github.io/airtime-calculator/ttn/eu868
        // for a 16-byte PHYPayload at SF7/125 kHz, CR 4/5.
        assert_eq!(airtime_us(Some(7), 125_000, 16, 1), 51_456);
    }

    #[test]
    fn test_sf12_bw125_with_ldro() {
        // SF12/125 kHz engages the low-data-rate optimizer.
        let t = airtime_us(Some(12), 125_000, 16, 1);
        assert_eq!(t, 1_318_912);
    }

    #[test]
    fn test_unknown_modulation_is_zero() {
        assert_eq!(airtime_us(None, 125_000, 32, 1), 0);
        assert_eq!(airtime_us(Some(7), 0, 32, 1), 0);
        assert_eq!(airtime_us(Some(42), 125_000, 32, 1), 0);
    }

    #[test]
    fn test_coding_rate_strings() {
        assert_eq!(coding_rate_value("4/5"), 1);
        assert_eq!(coding_rate_value("CR_4_6"), 2);
        assert_eq!(coding_rate_value("4/7"), 3);
        assert_eq!(coding_rate_value("CR_4_8"), 4);
        assert_eq!(coding_rate_value(""), 1);
    }

    /// The reference formula, written independently of the implementation.
    fn reference_airtime_us(sf: u8, bw: u32, pl: usize, cr: u32) -> i64 {
        let t_sym = 2f64.powi(sf as i32) / bw as f64 * 1e6;
        let de = if (bw == 125_000 && sf >= 11) || (bw == 250_000 && sf == 12) {
            1.0
        } else {
            0.0
        };
        let num = 8.0 * pl as f64 - 4.0 * sf as f64 + 28.0 + 16.0;
        let n_payload = 8.0 + ((num / (4.0 * (sf as f64 - 2.0 * de))).ceil() * (cr as f64 + 4.0)).max(0.0);
        (t_sym * (8.0 + 4.25 + n_payload)).round() as i64
    }

    proptest! {
        #[test]
        fn prop_matches_semtech_formula(
            sf in 7u8..=12,
            bw in prop::sample::select(vec![125_000u32, 250_000, 500_000]),
            cr in 1u32..=4,
            pl in 1usize..=255,
        ) {
            let got = airtime_us(Some(sf), bw, pl, cr);
            let want = reference_airtime_us(sf, bw, pl, cr);
            prop_assert!((got - want).abs() <= 1, "sf={} bw={} pl={} cr={}: {} vs {}", sf, bw, pl, cr, got, want);
        }

        #[test]
        fn prop_airtime_is_monotonic_in_payload(
            sf in 7u8..=12,
            bw in prop::sample::select(vec![125_000u32, 250_000, 500_000]),
            pl in 1usize..=254,
        ) {
            prop_assert!(airtime_us(Some(sf), bw, pl + 1, 1) >= airtime_us(Some(sf), bw, pl, 1));
        }
    }
}
