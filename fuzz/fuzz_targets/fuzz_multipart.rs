#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shiguredo_framing::multipart::{MultipartBuilder, MultipartDecoder, Part};

#[derive(Arbitrary, Debug)]
struct FuzzMultipart {
    random_value: u64,
    fields: Vec<(String, Vec<u8>)>,
    raw: Vec<u8>,
    split_hint: u8,
}

fn decode(boundary: &str, data: &[u8], split_size: usize) -> Option<Vec<Part>> {
    let mut decoder = MultipartDecoder::new(boundary).ok()?;
    for part in data.chunks(split_size) {
        let result = decoder.feed(part).ok()?;
        if result.finished {
            return Some(std::iter::from_fn(|| decoder.next_part()).collect());
        }
    }
    decoder.end_of_stream().ok()?;
    Some(std::iter::from_fn(|| decoder.next_part()).collect())
}

fuzz_target!(|input: FuzzMultipart| {
    let split_size = (input.split_hint as usize % 32) + 1;
    let builder = MultipartBuilder::new(input.random_value);
    let boundary = builder.boundary().to_string();

    // 任意のバイト列でもパニックしない
    let _ = decode(&boundary, &input.raw, split_size);

    // 上限に収まる英数字の名前だけを使う
    let fields: Vec<_> = input
        .fields
        .iter()
        .filter(|(name, value)| {
            name.len() <= 64
                && value.len() <= 4096
                && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
        })
        .take(16)
        .collect();
    let builder = fields
        .iter()
        .fold(builder, |b, (name, value)| b.part(Part::new(name).with_body(value)));
    // 境界を含むボディは build で拒否される
    let Ok(encoded) = builder.build() else {
        return;
    };

    let whole = decode(&boundary, &encoded, encoded.len().max(1));
    let split = decode(&boundary, &encoded, split_size);
    assert_eq!(whole, split);
    let parts = whole.expect("built body must decode");
    assert_eq!(parts.len(), fields.len());
    for (part, (_, value)) in parts.iter().zip(&fields) {
        assert_eq!(part.body(), value.as_slice());
    }
});
