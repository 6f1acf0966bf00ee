#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_framing::http::{HttpEvent, RequestDecoder};

fn decode(data: &[u8], split_size: usize) -> (Vec<HttpEvent>, bool) {
    let mut decoder = RequestDecoder::new().expect("default limits are valid");
    let mut events = Vec::new();
    for part in data.chunks(split_size) {
        let result = decoder.feed(part);
        events.extend(std::iter::from_fn(|| decoder.next_event()));
        match result {
            Ok(r) if r.finished => return (events, true),
            Ok(_) => {}
            Err(_) => return (events, false),
        }
    }
    let ok = decoder.end_of_stream().is_ok();
    events.extend(std::iter::from_fn(|| decoder.next_event()));
    (events, ok)
}

fuzz_target!(|data: &[u8]| {
    // データを一度に feed
    let whole = decode(data, data.len().max(1));

    // データを分割して feed (ストリーミングシナリオ)
    let split = decode(data, 17);
    assert_eq!(whole.1, split.1);
    if whole.1 {
        assert_eq!(whole.0, split.0);
    }
});
