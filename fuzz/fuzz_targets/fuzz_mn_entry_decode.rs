#![no_main]

use libfuzzer_sys::fuzz_target;
use ps_mnlist::MasternodeEntry;

// Arbitrary bytes must never panic the SML entry decoder, and any entry
// that decodes must survive a re-encode.
fuzz_target!(|data: &[u8]| {
    if let Ok(entry) = MasternodeEntry::from_bytes(data) {
        let encoded = entry.serialize();
        assert!(encoded.len() <= data.len());
        assert_eq!(MasternodeEntry::from_bytes(&encoded).ok(), Some(entry.clone()));
        let _ = entry.content_hash();
    }
});
