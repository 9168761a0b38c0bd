//! Cycling Power characteristic payloads.
//!
//! The broker decodes every notification and indication before it is
//! fanned out, so subscribers receive typed data instead of raw bytes.

pub mod cps;
pub mod reader;

pub use cps::{
    ControlPointResponse, DateTime, MeasurementData, ProcedureRequest, ResponseCode,
    ResponseParameter, SensorLocation, VectorData,
};
