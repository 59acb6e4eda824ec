#![no_main]

use libfuzzer_sys::fuzz_target;

use cachefill::cache::record;

fuzz_target!(|data: &[u8]| {
    if let Ok(decoded) = record::decode(data) {
        let encoded = record::encode(&decoded);
        assert_eq!(encoded.as_slice(), data);
        assert_eq!(record::encoded_len(&decoded), data.len());
    }
});
