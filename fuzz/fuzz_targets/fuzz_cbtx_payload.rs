#![no_main]

use libfuzzer_sys::fuzz_target;
use ps_mnlist::CbTxPayload;

fuzz_target!(|data: &[u8]| {
    if let Ok(payload) = CbTxPayload::from_bytes(data) {
        assert_eq!(payload.merkle_root_quorums.is_some(), payload.version >= 2);
        let _ = payload.to_bytes();
    }
});
