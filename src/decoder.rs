//! Telemetry line decoder.
//!
//! Turns one comma-separated telemetry line into a [`Record`]. Decoding is pure:
//! it never touches shared state, so a failure cannot disturb the caller's loop.
//!
//! ```rust
//! use groundlink::FrameDecoder;
//!
//! let line = "4421,00:12:34,7,305.12,101325.00,23.40,7.98,00:12:33,\
//!             12.971600,77.594100,920.50,9,14.20,3.00,1.234,-0.987,178.500";
//! let record = FrameDecoder::decode(line).unwrap();
//! assert_eq!(record.packet_count, 7);
//! assert_eq!(record.gps_sats, 9);
//! ```

use std::str::FromStr;

use crate::error::{DecodeError, DecodeReason};
use crate::types::{Field, Frame, Record};

/// Separator between fields of a telemetry line.
pub const FIELD_DELIMITER: char = ',';

/// Stateless decoder for telemetry lines.
pub struct FrameDecoder;

impl FrameDecoder {
    /// Decode a telemetry line.
    ///
    /// Fields are trimmed of surrounding whitespace. The line must contain exactly
    /// [`Field::COUNT`] fields, none empty, each numeric field parsing as its type.
    pub fn decode(raw_text: &str) -> Result<Record, DecodeError> {
        let fields: Vec<&str> = raw_text.split(FIELD_DELIMITER).map(str::trim).collect();
        if fields.len() != Field::COUNT {
            return Err(DecodeError::new(
                DecodeReason::FieldCountMismatch { expected: Field::COUNT, found: fields.len() },
                raw_text,
            ));
        }

        let line = Line { fields: &fields, raw_text };
        Ok(Record {
            team_id: line.text(Field::TeamId)?,
            mission_time: line.text(Field::MissionTime)?,
            packet_count: line.number(Field::PacketCount)?,
            altitude: line.number(Field::Altitude)?,
            pressure: line.number(Field::Pressure)?,
            temperature: line.number(Field::Temperature)?,
            voltage: line.number(Field::Voltage)?,
            gps_time: line.text(Field::GpsTime)?,
            gps_lat: line.number(Field::GpsLat)?,
            gps_lon: line.number(Field::GpsLon)?,
            gps_alt: line.number(Field::GpsAlt)?,
            gps_sats: line.number(Field::GpsSats)?,
            air_speed: line.number(Field::AirSpeed)?,
            particle_count: line.number(Field::ParticleCount)?,
            pitch: line.number(Field::Pitch)?,
            roll: line.number(Field::Roll)?,
            yaw: line.number(Field::Yaw)?,
        })
    }

    /// Decode a raw frame.
    ///
    /// Returns `Ok(None)` for a frame whose text is empty after dropping invalid
    /// UTF-8 and surrounding whitespace; such frames carry no sample.
    pub fn decode_frame(frame: &Frame) -> Result<Option<Record>, DecodeError> {
        let text = frame.text();
        if text.is_empty() {
            return Ok(None);
        }
        Self::decode(&text).map(Some)
    }
}

struct Line<'a> {
    fields: &'a [&'a str],
    raw_text: &'a str,
}

impl Line<'_> {
    fn raw(&self, field: Field) -> Result<&str, DecodeError> {
        // Field::ALL is in wire order, so the discriminant is the column index.
        let value = self.fields[field as usize];
        if value.is_empty() {
            return Err(DecodeError::new(DecodeReason::EmptyField { field }, self.raw_text));
        }
        Ok(value)
    }

    fn text(&self, field: Field) -> Result<String, DecodeError> {
        self.raw(field).map(str::to_string)
    }

    fn number<T: FromStr>(&self, field: Field) -> Result<T, DecodeError> {
        let value = self.raw(field)?;
        value.parse().map_err(|_| {
            DecodeError::new(
                DecodeReason::NumericParseFailure { field, value: value.to_string() },
                self.raw_text,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SCENARIO_A: &str = "4421,00:12:34,7,305.12,101325.00,23.40,7.98,00:12:33,12.971600,\
                              77.594100,920.50,9,14.20,3.00,1.234,-0.987,178.500";

    #[test]
    fn decodes_reference_line() {
        let record = FrameDecoder::decode(SCENARIO_A).unwrap();
        assert_eq!(record.team_id, "4421");
        assert_eq!(record.mission_time, "00:12:34");
        assert_eq!(record.packet_count, 7);
        assert_eq!(record.altitude, 305.12);
        assert_eq!(record.pressure, 101325.0);
        assert_eq!(record.gps_time, "00:12:33");
        assert_eq!(record.gps_lat, 12.9716);
        assert_eq!(record.gps_sats, 9);
        assert_eq!(record.roll, -0.987);
        assert_eq!(record.yaw, 178.5);
    }

    #[test]
    fn sixteen_fields_is_count_mismatch() {
        let line = SCENARIO_A.rsplit_once(',').unwrap().0;
        let err = FrameDecoder::decode(line).unwrap_err();
        assert_eq!(err.reason, DecodeReason::FieldCountMismatch { expected: 17, found: 16 });
        assert_eq!(err.raw_text, line);
    }

    #[test]
    fn reports_failing_numeric_field() {
        let line = SCENARIO_A.replace("305.12", "high");
        let err = FrameDecoder::decode(&line).unwrap_err();
        assert_eq!(
            err.reason,
            DecodeReason::NumericParseFailure { field: Field::Altitude, value: "high".into() }
        );
    }

    #[test]
    fn integer_fields_reject_fractions_and_negatives() {
        let fractional = SCENARIO_A.replacen(",7,", ",7.5,", 1);
        assert_eq!(FrameDecoder::decode(&fractional).unwrap_err().field(), Some(Field::PacketCount));

        let negative = SCENARIO_A.replace(",9,", ",-9,");
        assert_eq!(FrameDecoder::decode(&negative).unwrap_err().field(), Some(Field::GpsSats));
    }

    #[test]
    fn empty_fields_are_rejected() {
        let text_empty = SCENARIO_A.replacen("4421", "", 1);
        assert_eq!(
            FrameDecoder::decode(&text_empty).unwrap_err().reason,
            DecodeReason::EmptyField { field: Field::TeamId }
        );

        let numeric_empty = SCENARIO_A.replace("7.98", " ");
        assert_eq!(
            FrameDecoder::decode(&numeric_empty).unwrap_err().reason,
            DecodeReason::EmptyField { field: Field::Voltage }
        );
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let spaced = SCENARIO_A.replace(',', " , ");
        assert_eq!(FrameDecoder::decode(&spaced).unwrap(), FrameDecoder::decode(SCENARIO_A).unwrap());
    }

    #[test]
    fn blank_frame_is_skipped() {
        assert_eq!(FrameDecoder::decode_frame(&Frame::new(b" \r\n".to_vec())), Ok(None));
        let record = FrameDecoder::decode_frame(&Frame::new(format!("{SCENARIO_A}\r\n"))).unwrap();
        assert_eq!(record.map(|r| r.packet_count), Some(7));
    }

    prop_compose! {
        fn arb_record()(
            team in "[0-9]{4}",
            packet_count in any::<u32>(),
            floats in prop::collection::vec(-100_000.0f64..100_000.0, 12),
            gps_sats in 0u32..64
        ) -> Record {
            Record {
                team_id: team,
                mission_time: "01:02:03".into(),
                packet_count: packet_count as u64,
                altitude: floats[0],
                pressure: floats[1],
                temperature: floats[2],
                voltage: floats[3],
                gps_time: "01:02:02".into(),
                gps_lat: floats[4] / 1000.0,
                gps_lon: floats[5] / 1000.0,
                gps_alt: floats[6],
                gps_sats,
                air_speed: floats[7],
                particle_count: floats[8],
                pitch: floats[9] / 1000.0,
                roll: floats[10] / 1000.0,
                yaw: floats[11] / 1000.0,
            }
        }
    }

    proptest! {
        #[test]
        fn wrong_field_count_never_decodes(count in 0usize..40) {
            prop_assume!(count != Field::COUNT);
            let line = vec!["1"; count].join(",");
            let err = FrameDecoder::decode(&line).unwrap_err();
            let is_count_mismatch = matches!(err.reason, DecodeReason::FieldCountMismatch { .. });
            prop_assert!(is_count_mismatch);
        }

        #[test]
        fn logged_row_decodes_within_precision(record in arb_record()) {
            let decoded = FrameDecoder::decode(&record.log_row()).unwrap();
            prop_assert_eq!(&decoded.team_id, &record.team_id);
            prop_assert_eq!(decoded.packet_count, record.packet_count);
            prop_assert_eq!(decoded.gps_sats, record.gps_sats);
            for field in Field::ALL {
                if let (Some(a), Some(b), Some(places)) =
                    (decoded.float(field), record.float(field), field.precision())
                {
                    let tolerance = 0.5 * 10f64.powi(-(places as i32)) + 1e-9;
                    prop_assert!((a - b).abs() <= tolerance, "{} drifted: {} vs {}", field, a, b);
                }
            }
        }
    }
}
