#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shiguredo_framing::{ParseMode, Stage, StageStatus};

#[derive(Arbitrary, Debug)]
struct FuzzStage {
    delimiters: Vec<Vec<u8>>,
    fixed_size: Option<u8>,
    max_size: u8,
    data: Vec<u8>,
    split_hint: u8,
    end_of_stream_completion: bool,
}

fn run(input: &FuzzStage, mode: ParseMode, split_size: usize) -> Option<Stage> {
    let max_size = usize::from(input.max_size);
    let mut stage = Stage::new("fuzz", mode, max_size)
        .ok()?
        .with_end_of_stream_completion(input.end_of_stream_completion);
    for part in input.data.chunks(split_size) {
        match stage.feed(part) {
            Ok(result) if result.finished => break,
            Ok(result) => assert_eq!(result.accepted, part.len()),
            Err(e) => {
                assert!(e.accepted <= part.len());
                break;
            }
        }
    }
    if stage.status() == StageStatus::NeedMoreData {
        let _ = stage.end_of_stream();
    }
    assert!(stage.consumed() <= max_size);
    Some(stage)
}

fuzz_target!(|input: FuzzStage| {
    let mode = match input.fixed_size {
        Some(n) => ParseMode::FixedSize(usize::from(n)),
        None => {
            let set: Vec<&[u8]> = input
                .delimiters
                .iter()
                .take(4)
                .map(|d| &d[..d.len().min(8)])
                .collect();
            ParseMode::delimiters(&set)
        }
    };

    let split_size = (input.split_hint as usize % 16) + 1;
    let Some(whole) = run(&input, mode.clone(), input.data.len().max(1)) else {
        return;
    };
    let Some(split) = run(&input, mode, split_size) else {
        return;
    };

    // 分割の仕方によらず結果は同じ
    assert_eq!(whole.status(), split.status());
    if whole.is_done() {
        assert_eq!(whole.parsed_content(), split.parsed_content());
        assert_eq!(whole.matched_index(), split.matched_index());
    }
});
