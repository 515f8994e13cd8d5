#![no_main]

use libfuzzer_sys::fuzz_target;
use ps_mnlist::QuorumCommitment;

fuzz_target!(|data: &[u8]| {
    if let Ok(commitment) = QuorumCommitment::from_bytes(data) {
        let again = QuorumCommitment::from_bytes(&commitment.serialize());
        assert_eq!(again.ok().as_ref(), Some(&commitment));
    }
});
