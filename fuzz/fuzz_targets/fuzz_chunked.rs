#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shiguredo_framing::{ChunkedDecoder, DecoderLimits, encode_chunks};

#[derive(Arbitrary, Debug)]
struct FuzzChunked {
    chunks: Vec<Vec<u8>>,
    raw: Vec<u8>,
    split_hint: u8,
    piece_hint: u8,
}

fn decode(encoded: &[u8], split_size: usize, piece: usize) -> Option<(Vec<u8>, usize)> {
    let limits = DecoderLimits {
        body_piece_size: piece,
        ..Default::default()
    };
    let mut decoder = ChunkedDecoder::with_limits(limits).ok()?;
    let mut body = Vec::new();
    let mut accepted = 0;
    for part in encoded.chunks(split_size) {
        let result = decoder.feed(part).ok()?;
        accepted += result.accepted;
        decoder.read_body(&mut body);
        if result.finished {
            return Some((body, accepted));
        }
    }
    decoder.end_of_stream().ok()?;
    None
}

fuzz_target!(|input: FuzzChunked| {
    let split_size = (input.split_hint as usize % 32) + 1;
    let piece = (input.piece_hint as usize % 64) + 1;

    // 任意のバイト列でもパニックしない
    let _ = decode(&input.raw, split_size, piece);

    let chunks: Vec<&[u8]> = input.chunks.iter().take(64).map(|c| c.as_slice()).collect();
    let Ok(encoded) = encode_chunks(&chunks) else {
        return;
    };
    let expected = chunks.concat();
    let whole = decode(&encoded, encoded.len().max(1), piece);
    let split = decode(&encoded, split_size, piece);
    assert_eq!(whole, Some((expected.clone(), encoded.len())));
    assert_eq!(split, Some((expected, encoded.len())));
});
