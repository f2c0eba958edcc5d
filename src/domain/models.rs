//! Core types for the LED controller: attributes, their value ranges,
//! session state, and the events the session reports to its driver.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::infrastructure::bluetooth::transport::TransportError;

/// One of the four controllable characteristics exposed by the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Brightness,
    Animation,
    DelayTime,
    Color,
}

impl Attribute {
    pub const ALL: [Attribute; 4] = [
        Attribute::Brightness,
        Attribute::Animation,
        Attribute::DelayTime,
        Attribute::Color,
    ];

    /// Stable index, used for per-attribute slots in the store and debouncer.
    pub const fn index(self) -> usize {
        match self {
            Attribute::Brightness => 0,
            Attribute::Animation => 1,
            Attribute::DelayTime => 2,
            Attribute::Color => 3,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Attribute::Brightness => "brightness",
            Attribute::Animation => "animation",
            Attribute::DelayTime => "delay-time",
            Attribute::Color => "color",
        };
        f.write_str(name)
    }
}

/// Animation program running on the strip. The wire encoding is the ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationMode {
    Meteor = 0,
    Solid = 1,
    Wipe = 2,
    Fade = 3,
}

impl AnimationMode {
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(AnimationMode::Meteor),
            1 => Some(AnimationMode::Solid),
            2 => Some(AnimationMode::Wipe),
            3 => Some(AnimationMode::Fade),
            _ => None,
        }
    }

    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for AnimationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnimationMode::Meteor => "meteor",
            AnimationMode::Solid => "solid",
            AnimationMode::Wipe => "wipe",
            AnimationMode::Fade => "fade",
        };
        f.write_str(name)
    }
}

impl FromStr for AnimationMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "meteor" => Ok(AnimationMode::Meteor),
            "solid" => Ok(AnimationMode::Solid),
            "wipe" => Ok(AnimationMode::Wipe),
            "fade" => Ok(AnimationMode::Fade),
            _ => Err(()),
        }
    }
}

/// HSV color as the peripheral stores it: three bytes, each component
/// scaled to 0-255 (hue is *not* 0-360 on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv {
    pub hue: u8,
    pub saturation: u8,
    pub value: u8,
}

impl Hsv {
    pub const fn new(hue: u8, saturation: u8, value: u8) -> Self {
        Self {
            hue,
            saturation,
            value,
        }
    }

    /// Quantize from conventional units (hue in degrees, saturation and
    /// value in 0.0-1.0). Truncating, matching the controller firmware's
    /// expectation; the round trip is lossy by about 1.4 degrees of hue.
    pub fn from_degrees(hue_deg: f32, saturation: f32, value: f32) -> Self {
        let hue = (hue_deg.rem_euclid(360.0) / 360.0 * 255.0) as u8;
        let saturation = (saturation.clamp(0.0, 1.0) * 255.0) as u8;
        let value = (value.clamp(0.0, 1.0) * 255.0) as u8;
        Self {
            hue,
            saturation,
            value,
        }
    }

    pub fn hue_degrees(self) -> f32 {
        f32::from(self.hue) / 255.0 * 360.0
    }

    pub fn saturation_unit(self) -> f32 {
        f32::from(self.saturation) / 255.0
    }

    pub fn value_unit(self) -> f32 {
        f32::from(self.value) / 255.0
    }
}

impl fmt::Display for Hsv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h={} s={} v={}", self.hue, self.saturation, self.value)
    }
}

/// A validated attribute value. Constructed through [`AttributeRequest::validate`]
/// or decoded from the wire, so every inhabitant is within the legal range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeValue {
    Brightness(u8),
    Animation(AnimationMode),
    /// Inter-frame delay in peripheral ticks, 1-255. Zero would stall the
    /// animation loop on the strip and is rejected.
    DelayTime(u8),
    Color(Hsv),
}

impl AttributeValue {
    pub fn attribute(&self) -> Attribute {
        match self {
            AttributeValue::Brightness(_) => Attribute::Brightness,
            AttributeValue::Animation(_) => Attribute::Animation,
            AttributeValue::DelayTime(_) => Attribute::DelayTime,
            AttributeValue::Color(_) => Attribute::Color,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Brightness(v) => write!(f, "brightness {v}"),
            AttributeValue::Animation(mode) => write!(f, "animation {mode}"),
            AttributeValue::DelayTime(v) => write!(f, "delay-time {v}"),
            AttributeValue::Color(hsv) => write!(f, "color {hsv}"),
        }
    }
}

/// A requested attribute change as it arrives from a driver control.
///
/// Components are wider than the wire format so that out-of-range input
/// can be reported instead of silently truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeRequest {
    Brightness(u16),
    /// Animation ordinal, 0-3.
    Animation(u8),
    DelayTime(u16),
    Color {
        hue: u16,
        saturation: u16,
        value: u16,
    },
}

impl AttributeRequest {
    pub fn attribute(&self) -> Attribute {
        match self {
            AttributeRequest::Brightness(_) => Attribute::Brightness,
            AttributeRequest::Animation(_) => Attribute::Animation,
            AttributeRequest::DelayTime(_) => Attribute::DelayTime,
            AttributeRequest::Color { .. } => Attribute::Color,
        }
    }

    /// Range-check the request and narrow it to a wire-ready value.
    pub fn validate(self) -> Result<AttributeValue, OutOfRange> {
        match self {
            AttributeRequest::Brightness(v) => match u8::try_from(v) {
                Ok(v) => Ok(AttributeValue::Brightness(v)),
                Err(_) => Err(OutOfRange::new(Attribute::Brightness, v, 0, 255)),
            },
            AttributeRequest::Animation(ordinal) => AnimationMode::from_ordinal(ordinal)
                .map(AttributeValue::Animation)
                .ok_or_else(|| OutOfRange::new(Attribute::Animation, u16::from(ordinal), 0, 3)),
            AttributeRequest::DelayTime(v) => match u8::try_from(v) {
                Ok(v) if v >= 1 => Ok(AttributeValue::DelayTime(v)),
                _ => Err(OutOfRange::new(Attribute::DelayTime, v, 1, 255)),
            },
            AttributeRequest::Color {
                hue,
                saturation,
                value,
            } => {
                for component in [hue, saturation, value] {
                    if component > 255 {
                        return Err(OutOfRange::new(Attribute::Color, component, 0, 255));
                    }
                }
                Ok(AttributeValue::Color(Hsv::new(
                    hue as u8,
                    saturation as u8,
                    value as u8,
                )))
            }
        }
    }
}

/// A value fell outside the attribute's legal range. Raised locally,
/// before anything reaches the transport.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{value} is out of range for {attribute} (allowed {min}..={max})")]
pub struct OutOfRange {
    pub attribute: Attribute,
    pub value: u16,
    pub min: u16,
    pub max: u16,
}

impl OutOfRange {
    pub(crate) fn new(attribute: Attribute, value: u16, min: u16, max: u16) -> Self {
        Self {
            attribute,
            value,
            min,
            max,
        }
    }
}

/// Where the session currently is in the connect sequence.
///
/// Every transition is driven by a transport event; link loss from any
/// state returns to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    ReadingInitial,
    Ready,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Scanning => "scanning",
            SessionState::Connecting => "connecting",
            SessionState::DiscoveringServices => "discovering-services",
            SessionState::ReadingInitial => "reading-initial",
            SessionState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Notifications the session emits towards its driver.
#[derive(Debug)]
pub enum SessionEvent {
    StateChanged(SessionState),
    AttributeChanged(AttributeValue),
    /// The transport reported link loss. Emitted before the accompanying
    /// `StateChanged(Idle)`, and never for a driver-commanded disconnect,
    /// so the driver can rescan on one without looping on the other.
    LinkLost,
    /// A transport operation failed. Terminal for that operation; the
    /// session does not retry, the driver decides what to do next.
    Failed(TransportError),
}
