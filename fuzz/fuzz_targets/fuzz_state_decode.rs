#![no_main]
use filabuf_core::persist;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Any blob either errors or decodes to a state whose encoding is a fixed point.
    if let Ok(state) = persist::decode(data) {
        let blob = persist::encode(&state).expect("decoded state must encode");
        let again = persist::decode(&blob).expect("encoded state must decode");
        let blob_again = persist::encode(&again).expect("re-decoded state must encode");
        assert_eq!(blob, blob_again);
    }
});
