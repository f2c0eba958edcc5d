//! LED controller GATT contract.
//!
//! One service, four characteristics, all single-write scalar payloads:
//!
//! | Characteristic | Payload                                     |
//! |----------------|---------------------------------------------|
//! | Brightness     | 1 byte, raw 0-255                           |
//! | Animation      | 1 byte, enum ordinal 0-3                    |
//! | Delay time     | 1 byte, raw 1-255                           |
//! | Color          | 3 bytes: hue, saturation, value, each 0-255 |

use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::{Attribute, AttributeRequest, AttributeValue, OutOfRange};

/// LED controller service UUID.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x318e961b_a7ba_4acf_95a3_11d94bf554b1);

pub const BRIGHTNESS_CHAR_UUID: Uuid = Uuid::from_u128(0xde6e22e4_07a0_4924_bc3c_a054ed998e31);
pub const ANIMATION_CHAR_UUID: Uuid = Uuid::from_u128(0xa96ac45a_57af_4b56_b92d_e9dfb800b521);
pub const COLOR_CHAR_UUID: Uuid = Uuid::from_u128(0x75e42479_5c7e_494d_b391_1d1311153bf5);
pub const DELAY_TIME_CHAR_UUID: Uuid = Uuid::from_u128(0x778decdc_ef0f_4151_9ab6_000150d7d21a);

/// Default characteristic UUID for an attribute.
pub fn characteristic_uuid(attribute: Attribute) -> Uuid {
    match attribute {
        Attribute::Brightness => BRIGHTNESS_CHAR_UUID,
        Attribute::Animation => ANIMATION_CHAR_UUID,
        Attribute::DelayTime => DELAY_TIME_CHAR_UUID,
        Attribute::Color => COLOR_CHAR_UUID,
    }
}

/// Expected payload length for an attribute.
pub fn payload_len(attribute: Attribute) -> usize {
    match attribute {
        Attribute::Color => 3,
        _ => 1,
    }
}

/// Encode a value into its characteristic payload.
pub fn encode(value: &AttributeValue) -> Vec<u8> {
    match value {
        AttributeValue::Brightness(v) => vec![*v],
        AttributeValue::Animation(mode) => vec![mode.ordinal()],
        AttributeValue::DelayTime(v) => vec![*v],
        AttributeValue::Color(hsv) => vec![hsv.hue, hsv.saturation, hsv.value],
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{attribute}: expected {expected}-byte payload, got {actual}")]
    Length {
        attribute: Attribute,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    OutOfRange(#[from] OutOfRange),
}

/// Decode a characteristic payload read back from the peripheral.
///
/// Rejects wrong lengths and values the peripheral should never report
/// (animation ordinal above 3, delay of zero).
pub fn decode(attribute: Attribute, bytes: &[u8]) -> Result<AttributeValue, DecodeError> {
    let expected = payload_len(attribute);
    if bytes.len() != expected {
        return Err(DecodeError::Length {
            attribute,
            expected,
            actual: bytes.len(),
        });
    }

    let request = match attribute {
        Attribute::Brightness => AttributeRequest::Brightness(u16::from(bytes[0])),
        Attribute::Animation => AttributeRequest::Animation(bytes[0]),
        Attribute::DelayTime => AttributeRequest::DelayTime(u16::from(bytes[0])),
        Attribute::Color => AttributeRequest::Color {
            hue: u16::from(bytes[0]),
            saturation: u16::from(bytes[1]),
            value: u16::from(bytes[2]),
        },
    };
    Ok(request.validate()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AnimationMode, Hsv};

    #[test]
    fn scalar_attributes_encode_to_one_raw_byte() {
        assert_eq!(encode(&AttributeValue::Brightness(200)), vec![200]);
        assert_eq!(encode(&AttributeValue::DelayTime(50)), vec![50]);
        assert_eq!(
            encode(&AttributeValue::Animation(AnimationMode::Wipe)),
            vec![2]
        );
    }

    #[test]
    fn color_encodes_as_hsv_triple() {
        assert_eq!(
            encode(&AttributeValue::Color(Hsv::new(127, 255, 127))),
            vec![127, 255, 127]
        );
    }

    #[test]
    fn decode_inverts_encode() {
        for value in [
            AttributeValue::Brightness(0),
            AttributeValue::Animation(AnimationMode::Fade),
            AttributeValue::DelayTime(1),
            AttributeValue::Color(Hsv::new(10, 20, 30)),
        ] {
            let decoded = decode(value.attribute(), &encode(&value)).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn decode_rejects_illegal_peripheral_values() {
        assert!(matches!(
            decode(Attribute::Animation, &[4]),
            Err(DecodeError::OutOfRange(_))
        ));
        assert!(matches!(
            decode(Attribute::DelayTime, &[0]),
            Err(DecodeError::OutOfRange(_))
        ));
    }

    #[test]
    fn decode_rejects_wrong_lengths() {
        assert!(matches!(
            decode(Attribute::Brightness, &[1, 2]),
            Err(DecodeError::Length { .. })
        ));
        assert!(matches!(
            decode(Attribute::Color, &[1]),
            Err(DecodeError::Length { .. })
        ));
        assert!(matches!(
            decode(Attribute::Color, &[]),
            Err(DecodeError::Length { .. })
        ));
    }

    #[test]
    fn characteristic_uuids_are_distinct() {
        let mut uuids: Vec<Uuid> = Attribute::ALL
            .iter()
            .map(|a| characteristic_uuid(*a))
            .collect();
        uuids.sort();
        uuids.dedup();
        assert_eq!(uuids.len(), 4);
    }
}
