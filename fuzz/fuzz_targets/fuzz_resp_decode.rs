//! Fuzz target for the RESP decoder and monitor reply interpretation.
//!
//! Monitor replies come from the network, so decoding arbitrary bytes must
//! never panic, and every decoded value must survive the record and endpoint
//! parsing the connector applies to it.

#![no_main]

use bytes::BytesMut;
use inferadb_ledger_sentinel::{
    CandidateReplica, MonitorEndpoint,
    resp::{self, Value},
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    match data[0] % 3 {
        // Arbitrary bytes through the frame decoder
        0 => fuzz_decode(&data[1..]),
        // Re-encoding a decoded value yields the same value
        1 => fuzz_reencode(&data[1..]),
        // Endpoint strings as found in manifests and command lines
        _ => fuzz_endpoint(&data[1..]),
    }
});

fn fuzz_decode(data: &[u8]) {
    let mut buf = BytesMut::from(data);
    while let Ok(Some(value)) = resp::decode(&mut buf) {
        interpret(&value);
    }
}

fn fuzz_reencode(data: &[u8]) {
    let mut buf = BytesMut::from(data);
    let Ok(Some(value)) = resp::decode(&mut buf) else {
        return;
    };

    let mut encoded = BytesMut::new();
    resp::encode_value(&value, &mut encoded);
    let decoded = resp::decode(&mut encoded);
    assert!(matches!(decoded, Ok(Some(ref v)) if *v == value), "re-encoded value differs");
    assert!(encoded.is_empty(), "re-encoded value left trailing bytes");
}

fn interpret(value: &Value) {
    let _ = value.summary();
    if let Some(items) = value.as_array() {
        for record in items.iter().filter_map(resp::pack_record) {
            if let Some(candidate) = CandidateReplica::from_record(&record) {
                let _ = candidate.is_available();
                let _ = candidate.address().socket_string();
            }
        }
    }
}

fn fuzz_endpoint(data: &[u8]) {
    if let Ok(s) = std::str::from_utf8(data)
        && let Ok(endpoint) = s.parse::<MonitorEndpoint>()
    {
        let _ = endpoint.address().socket_string();
    }
}
