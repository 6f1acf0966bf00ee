#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_framing::LineDecoder;

fn decode(data: &[u8], split_size: usize) -> Option<Vec<Vec<u8>>> {
    let mut decoder = LineDecoder::with_max_line_size(256).ok()?;
    for part in data.chunks(split_size) {
        decoder.feed(part).ok()?;
    }
    decoder.end_of_stream().ok()?;
    assert!(decoder.is_finished());
    Some(std::iter::from_fn(|| decoder.next_line()).collect())
}

fuzz_target!(|data: &[u8]| {
    let whole = decode(data, data.len().max(1));
    let split = decode(data, 7);
    let bytes = decode(data, 1);
    assert_eq!(whole, split);
    assert_eq!(whole, bytes);

    if let Some(lines) = whole {
        for line in &lines {
            assert!(line.len() <= 256);
            assert!(!line.contains(&b'\n') && !line.contains(&b'\r'));
        }
    }
});
