//! Cycling Power Service value formats.
//!
//! ```text
//!  Measurement  [flags u16][power i16][optional fields selected by flags …]
//!  Vector       [flags u8][crank rev?][first angle?][i16 magnitudes …]
//!  CP command   [opcode u8][parameter 0..4 B]
//!  CP response  [0x20][request opcode][response code][parameter on success]
//! ```
//!
//! All multi-byte fields are little-endian. Decoders never trust a
//! declared field set beyond the bytes actually received.

use serde::{Deserialize, Serialize};

use super::reader::ByteReader;
use crate::error::{BrokerError, Result};

// ───────────────────────────────────────────────────────────────
// Flag and feature bits
// ───────────────────────────────────────────────────────────────

/// Cycling Power Measurement flags.
pub mod measurement_flags {
    pub const PEDAL_POWER_BALANCE_PRESENT: u16 = 0x0001;
    pub const PEDAL_POWER_BALANCE_REFERENCE_LEFT: u16 = 0x0002;
    pub const ACCUMULATED_TORQUE_PRESENT: u16 = 0x0004;
    pub const ACCUMULATED_TORQUE_SOURCE_CRANK: u16 = 0x0008;
    pub const WHEEL_REVOLUTION_DATA_PRESENT: u16 = 0x0010;
    pub const CRANK_REVOLUTION_DATA_PRESENT: u16 = 0x0020;
    pub const EXTREME_FORCE_MAGNITUDES_PRESENT: u16 = 0x0040;
    pub const EXTREME_TORQUE_MAGNITUDES_PRESENT: u16 = 0x0080;
    pub const EXTREME_ANGLES_PRESENT: u16 = 0x0100;
    pub const TOP_DEAD_SPOT_ANGLE_PRESENT: u16 = 0x0200;
    pub const BOTTOM_DEAD_SPOT_ANGLE_PRESENT: u16 = 0x0400;
    pub const ACCUMULATED_ENERGY_PRESENT: u16 = 0x0800;
    pub const OFFSET_COMPENSATION_INDICATOR: u16 = 0x1000;
}

/// Cycling Power Vector flags.
pub mod vector_flags {
    pub const CRANK_REVOLUTION_DATA_PRESENT: u8 = 0x01;
    pub const FIRST_CRANK_ANGLE_PRESENT: u8 = 0x02;
    pub const FORCE_MAGNITUDE_ARRAY_PRESENT: u8 = 0x04;
    pub const TORQUE_MAGNITUDE_ARRAY_PRESENT: u8 = 0x08;
    pub const DIRECTION_BITS: u8 = 0x30;
}

/// Cycling Power Feature bits.
pub mod feature_bits {
    pub const PEDAL_POWER_BALANCE: u32 = 0x0000_0001;
    pub const ACCUMULATED_TORQUE: u32 = 0x0000_0002;
    pub const WHEEL_REVOLUTION_DATA: u32 = 0x0000_0004;
    pub const CRANK_REVOLUTION_DATA: u32 = 0x0000_0008;
    pub const EXTREME_MAGNITUDES: u32 = 0x0000_0010;
    pub const EXTREME_ANGLES: u32 = 0x0000_0020;
    pub const DEAD_SPOT_ANGLES: u32 = 0x0000_0040;
    pub const ACCUMULATED_ENERGY: u32 = 0x0000_0080;
    pub const OFFSET_COMPENSATION_INDICATOR: u32 = 0x0000_0100;
    pub const OFFSET_COMPENSATION: u32 = 0x0000_0200;
    pub const CONTENT_MASKING: u32 = 0x0000_0400;
    pub const MULTIPLE_SENSOR_LOCATIONS: u32 = 0x0000_0800;
    pub const CRANK_LENGTH_ADJUSTMENT: u32 = 0x0000_1000;
    pub const CHAIN_LENGTH_ADJUSTMENT: u32 = 0x0000_2000;
    pub const CHAIN_WEIGHT_ADJUSTMENT: u32 = 0x0000_4000;
    pub const SPAN_LENGTH_ADJUSTMENT: u32 = 0x0000_8000;
    pub const SENSOR_MEASUREMENT_CONTEXT: u32 = 0x0001_0000;
    pub const MEASUREMENT_DIRECTION: u32 = 0x0002_0000;
    pub const FACTORY_CALIBRATION_DATE: u32 = 0x0004_0000;
}

// ───────────────────────────────────────────────────────────────
// Sensor location
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SensorLocation {
    Other = 0x00,
    TopOfShoe = 0x01,
    InShoe = 0x02,
    Hip = 0x03,
    FrontWheel = 0x04,
    LeftCrank = 0x05,
    RightCrank = 0x06,
    LeftPedal = 0x07,
    RightPedal = 0x08,
    FrontHub = 0x09,
    RearDropout = 0x0A,
    Chainstay = 0x0B,
    RearWheel = 0x0C,
    RearHub = 0x0D,
    Chest = 0x0E,
}

impl SensorLocation {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x00 => Self::Other,
            0x01 => Self::TopOfShoe,
            0x02 => Self::InShoe,
            0x03 => Self::Hip,
            0x04 => Self::FrontWheel,
            0x05 => Self::LeftCrank,
            0x06 => Self::RightCrank,
            0x07 => Self::LeftPedal,
            0x08 => Self::RightPedal,
            0x09 => Self::FrontHub,
            0x0A => Self::RearDropout,
            0x0B => Self::Chainstay,
            0x0C => Self::RearWheel,
            0x0D => Self::RearHub,
            0x0E => Self::Chest,
            _ => return None,
        })
    }

    /// Decode a Sensor Location read response.
    pub fn decode(value: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(value);
        Self::from_u8(r.read_u8()?).ok_or(BrokerError::ResponseMalformed)
    }
}

/// Decode a Cycling Power Feature read response.
pub fn decode_features(value: &[u8]) -> Result<u32> {
    ByteReader::new(value).read_u32_le()
}

// ───────────────────────────────────────────────────────────────
// Measurement
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WheelRevolution {
    pub cumulative_revolutions: u32,
    pub last_event_time: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrankRevolution {
    pub cumulative_revolutions: u16,
    pub last_event_time: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtremeMagnitudes {
    pub maximum: i16,
    pub minimum: i16,
}

/// Two 12-bit angles packed into three bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtremeAngles {
    pub maximum: u16,
    pub minimum: u16,
}

impl ExtremeAngles {
    fn read(r: &mut ByteReader<'_>) -> Result<Self> {
        let b = r.read_slice(3)?;
        Ok(Self {
            maximum: u16::from(b[0]) | (u16::from(b[1] & 0x0F) << 8),
            minimum: u16::from(b[1] >> 4) | (u16::from(b[2]) << 4),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementData {
    pub flags: u16,
    pub instantaneous_power: i16,
    pub pedal_power_balance: Option<u8>,
    pub accumulated_torque: Option<u16>,
    pub wheel_revolution: Option<WheelRevolution>,
    pub crank_revolution: Option<CrankRevolution>,
    pub extreme_force: Option<ExtremeMagnitudes>,
    pub extreme_torque: Option<ExtremeMagnitudes>,
    pub extreme_angles: Option<ExtremeAngles>,
    pub top_dead_spot_angle: Option<u16>,
    pub bottom_dead_spot_angle: Option<u16>,
    pub accumulated_energy: Option<u16>,
}

impl MeasurementData {
    pub fn decode(value: &[u8]) -> Result<Self> {
        use measurement_flags as f;

        let mut r = ByteReader::new(value);
        let flags = r.read_u16_le()?;
        let instantaneous_power = r.read_i16_le()?;

        let present = |bit: u16| flags & bit != 0;

        let pedal_power_balance = if present(f::PEDAL_POWER_BALANCE_PRESENT) {
            Some(r.read_u8()?)
        } else {
            None
        };
        let accumulated_torque = if present(f::ACCUMULATED_TORQUE_PRESENT) {
            Some(r.read_u16_le()?)
        } else {
            None
        };
        let wheel_revolution = if present(f::WHEEL_REVOLUTION_DATA_PRESENT) {
            Some(WheelRevolution {
                cumulative_revolutions: r.read_u32_le()?,
                last_event_time: r.read_u16_le()?,
            })
        } else {
            None
        };
        let crank_revolution = if present(f::CRANK_REVOLUTION_DATA_PRESENT) {
            Some(read_crank(&mut r)?)
        } else {
            None
        };
        let extreme_force = if present(f::EXTREME_FORCE_MAGNITUDES_PRESENT) {
            Some(read_extremes(&mut r)?)
        } else {
            None
        };
        let extreme_torque = if present(f::EXTREME_TORQUE_MAGNITUDES_PRESENT) {
            Some(read_extremes(&mut r)?)
        } else {
            None
        };
        let extreme_angles = if present(f::EXTREME_ANGLES_PRESENT) {
            Some(ExtremeAngles::read(&mut r)?)
        } else {
            None
        };
        let top_dead_spot_angle = if present(f::TOP_DEAD_SPOT_ANGLE_PRESENT) {
            Some(r.read_u16_le()?)
        } else {
            None
        };
        let bottom_dead_spot_angle = if present(f::BOTTOM_DEAD_SPOT_ANGLE_PRESENT) {
            Some(r.read_u16_le()?)
        } else {
            None
        };
        let accumulated_energy = if present(f::ACCUMULATED_ENERGY_PRESENT) {
            Some(r.read_u16_le()?)
        } else {
            None
        };

        Ok(Self {
            flags,
            instantaneous_power,
            pedal_power_balance,
            accumulated_torque,
            wheel_revolution,
            crank_revolution,
            extreme_force,
            extreme_torque,
            extreme_angles,
            top_dead_spot_angle,
            bottom_dead_spot_angle,
            accumulated_energy,
        })
    }
}

fn read_crank(r: &mut ByteReader<'_>) -> Result<CrankRevolution> {
    Ok(CrankRevolution {
        cumulative_revolutions: r.read_u16_le()?,
        last_event_time: r.read_u16_le()?,
    })
}

fn read_extremes(r: &mut ByteReader<'_>) -> Result<ExtremeMagnitudes> {
    Ok(ExtremeMagnitudes {
        maximum: r.read_i16_le()?,
        minimum: r.read_i16_le()?,
    })
}

// ───────────────────────────────────────────────────────────────
// Vector
// ───────────────────────────────────────────────────────────────

/// Direction of the instantaneous magnitudes in a vector update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasurementDirection {
    Unknown,
    Tangential,
    Radial,
    Lateral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorData {
    pub flags: u8,
    pub crank_revolution: Option<CrankRevolution>,
    pub first_crank_angle: Option<u16>,
    /// Force or torque magnitudes, depending on `flags`.
    pub magnitudes: Vec<i16>,
}

impl VectorData {
    pub fn decode(value: &[u8]) -> Result<Self> {
        use vector_flags as f;

        let mut r = ByteReader::new(value);
        let flags = r.read_u8()?;
        let crank_revolution = if flags & f::CRANK_REVOLUTION_DATA_PRESENT != 0 {
            Some(read_crank(&mut r)?)
        } else {
            None
        };
        let first_crank_angle = if flags & f::FIRST_CRANK_ANGLE_PRESENT != 0 {
            Some(r.read_u16_le()?)
        } else {
            None
        };

        let tail = r.consume();
        if tail.len() % 2 != 0 {
            return Err(BrokerError::ResponseMalformed);
        }
        let magnitudes = tail
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();

        Ok(Self {
            flags,
            crank_revolution,
            first_crank_angle,
            magnitudes,
        })
    }

    pub fn direction(&self) -> MeasurementDirection {
        match (self.flags & vector_flags::DIRECTION_BITS) >> 4 {
            1 => MeasurementDirection::Tangential,
            2 => MeasurementDirection::Radial,
            3 => MeasurementDirection::Lateral,
            _ => MeasurementDirection::Unknown,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Control point
// ───────────────────────────────────────────────────────────────

pub const OPCODE_RESPONSE: u8 = 0x20;

/// Largest encoded command: opcode plus a u32 parameter.
pub const MAX_COMMAND_LEN: usize = 5;

/// A control-point procedure a subscriber can start on a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcedureRequest {
    SetCumulativeValue(u32),
    UpdateSensorLocation(SensorLocation),
    RequestSupportedSensorLocations,
    SetCrankLength(u16),
    RequestCrankLength,
    SetChainLength(u16),
    RequestChainLength,
    SetChainWeight(u16),
    RequestChainWeight,
    SetSpanLength(u16),
    RequestSpanLength,
    StartOffsetCompensation,
    MaskMeasurementContent(u16),
    RequestSamplingRate,
    RequestFactoryCalibrationDate,
}

impl ProcedureRequest {
    pub const fn opcode(&self) -> u8 {
        match self {
            Self::SetCumulativeValue(_) => 0x01,
            Self::UpdateSensorLocation(_) => 0x02,
            Self::RequestSupportedSensorLocations => 0x03,
            Self::SetCrankLength(_) => 0x04,
            Self::RequestCrankLength => 0x05,
            Self::SetChainLength(_) => 0x06,
            Self::RequestChainLength => 0x07,
            Self::SetChainWeight(_) => 0x08,
            Self::RequestChainWeight => 0x09,
            Self::SetSpanLength(_) => 0x0A,
            Self::RequestSpanLength => 0x0B,
            Self::StartOffsetCompensation => 0x0C,
            Self::MaskMeasurementContent(_) => 0x0D,
            Self::RequestSamplingRate => 0x0E,
            Self::RequestFactoryCalibrationDate => 0x0F,
        }
    }

    /// Encode into the bytes written to the control point.
    pub fn encode(&self) -> heapless::Vec<u8, MAX_COMMAND_LEN> {
        let mut out = heapless::Vec::new();
        // Capacity covers the largest variant.
        let _ = out.push(self.opcode());
        let _ = match *self {
            Self::SetCumulativeValue(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::UpdateSensorLocation(loc) => out.push(loc as u8).map_err(|_| ()),
            Self::SetCrankLength(v)
            | Self::SetChainLength(v)
            | Self::SetChainWeight(v)
            | Self::SetSpanLength(v)
            | Self::MaskMeasurementContent(v) => out.extend_from_slice(&v.to_le_bytes()),
            _ => Ok(()),
        };
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResponseCode {
    Success = 0x01,
    OpcodeNotSupported = 0x02,
    InvalidParameter = 0x03,
    OperationFailed = 0x04,
}

impl ResponseCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Success),
            0x02 => Some(Self::OpcodeNotSupported),
            0x03 => Some(Self::InvalidParameter),
            0x04 => Some(Self::OperationFailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

impl DateTime {
    fn read(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            year: r.read_u16_le()?,
            month: r.read_u8()?,
            day: r.read_u8()?,
            hours: r.read_u8()?,
            minutes: r.read_u8()?,
            seconds: r.read_u8()?,
        })
    }
}

/// Opcode-specific parameter carried by a successful response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseParameter {
    SupportedSensorLocations(Vec<SensorLocation>),
    CrankLength(u16),
    ChainLength(u16),
    ChainWeight(u16),
    SpanLength(u16),
    OffsetCompensation(i16),
    SamplingRate(u8),
    FactoryCalibrationDate(DateTime),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPointResponse {
    pub request_opcode: u8,
    pub response_code: ResponseCode,
    pub parameter: Option<ResponseParameter>,
}

impl ControlPointResponse {
    pub fn decode(value: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(value);
        if r.read_u8()? != OPCODE_RESPONSE {
            return Err(BrokerError::ResponseMalformed);
        }
        let request_opcode = r.read_u8()?;
        let response_code = ResponseCode::from_u8(r.read_u8()?).ok_or(BrokerError::ResponseMalformed)?;

        let parameter = if response_code == ResponseCode::Success {
            Self::read_parameter(request_opcode, r)?
        } else {
            None
        };

        Ok(Self {
            request_opcode,
            response_code,
            parameter,
        })
    }

    fn read_parameter(opcode: u8, mut r: ByteReader<'_>) -> Result<Option<ResponseParameter>> {
        Ok(Some(match opcode {
            0x03 => {
                let list = r
                    .consume()
                    .iter()
                    .map(|&b| SensorLocation::from_u8(b).ok_or(BrokerError::ResponseMalformed))
                    .collect::<Result<Vec<_>>>()?;
                ResponseParameter::SupportedSensorLocations(list)
            }
            0x05 => ResponseParameter::CrankLength(r.read_u16_le()?),
            0x07 => ResponseParameter::ChainLength(r.read_u16_le()?),
            0x09 => ResponseParameter::ChainWeight(r.read_u16_le()?),
            0x0B => ResponseParameter::SpanLength(r.read_u16_le()?),
            0x0C => ResponseParameter::OffsetCompensation(r.read_i16_le()?),
            0x0E => ResponseParameter::SamplingRate(r.read_u8()?),
            0x0F => ResponseParameter::FactoryCalibrationDate(DateTime::read(&mut r)?),
            _ => return Ok(None),
        }))
    }
}
