//! Fuzz target: Cycling Power payload decoders
//!
//! Feeds the same bytes to the measurement, vector and control point
//! decoders. A sensor controls these bytes completely.
//!
//! Invariants checked:
//! - No panics under any byte sequence
//! - A decoded control point response always came from a response opcode
//!
//! cargo fuzz run fuzz_cps_payloads

#![no_main]

use cppm_broker::protocol::cps::OPCODE_RESPONSE;
use cppm_broker::protocol::{ControlPointResponse, MeasurementData, SensorLocation, VectorData};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = MeasurementData::decode(data);
    let _ = VectorData::decode(data);
    let _ = SensorLocation::decode(data);

    if ControlPointResponse::decode(data).is_ok() {
        assert_eq!(data[0], OPCODE_RESPONSE);
    }
});
