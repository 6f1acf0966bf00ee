#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_framing::http::{HttpEvent, ResponseDecoder};

fn decode(data: &[u8], split_size: usize, head: bool) -> (Vec<HttpEvent>, bool) {
    let mut decoder = ResponseDecoder::new().expect("default limits are valid");
    decoder.set_expect_no_body(head);
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
    let Some((&flag, data)) = data.split_first() else {
        return;
    };
    let head = flag & 1 == 1;

    let whole = decode(data, data.len().max(1), head);
    let split = decode(data, 13, head);
    assert_eq!(whole.1, split.1);
    if whole.1 {
        assert_eq!(whole.0, split.0);
    }
});
