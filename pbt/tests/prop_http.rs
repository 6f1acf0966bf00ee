//! HTTP デコーダーのプロパティテスト

use pbt::{feed_pieces, headers, split_at_points, split_points};
use proptest::prelude::*;
use shiguredo_framing::http::{BodyKind, HttpEvent, RequestDecoder, ResponseDecoder};
use shiguredo_framing::{DecoderLimits, encode_chunks};

// ========================================
// Strategy 定義
// ========================================

fn http_method() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("GET".to_string()),
        Just("POST".to_string()),
        Just("PUT".to_string()),
        Just("DELETE".to_string()),
        Just("OPTIONS".to_string()),
        Just("PATCH".to_string()),
    ]
}

fn http_target() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("/".to_string()),
        "/[a-zA-Z0-9/_.?=&-]{1,48}".prop_map(|s| s),
    ]
}

fn status_code() -> impl Strategy<Value = u16> {
    prop_oneof![200u16..=206, 300u16..=303, 400u16..=451, 500u16..=511]
}

#[derive(Debug, Clone)]
enum Framing {
    ContentLength,
    Chunked(Vec<usize>),
}

fn framing() -> impl Strategy<Value = Framing> {
    prop_oneof![
        Just(Framing::ContentLength),
        proptest::collection::vec(1usize..64, 0..4).prop_map(Framing::Chunked),
    ]
}

/// ボディの長さを決めるヘッダーを除いたヘッダー
fn plain_headers() -> impl Strategy<Value = Vec<(String, String)>> {
    headers(6).prop_map(|headers| {
        headers
            .into_iter()
            .filter(|(n, _)| {
                !n.eq_ignore_ascii_case("Content-Length")
                    && !n.eq_ignore_ascii_case("Transfer-Encoding")
            })
            .collect()
    })
}

fn message(
    start_line: &str,
    headers: &[(String, String)],
    body: &[u8],
    framing: &Framing,
) -> Vec<u8> {
    let mut out = format!("{start_line}\r\n").into_bytes();
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    match framing {
        Framing::ContentLength => {
            out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
            out.extend_from_slice(body);
        }
        Framing::Chunked(sizes) => {
            out.extend_from_slice(b"Transfer-Encoding: chunked\r\n\r\n");
            let mut rest = body;
            let mut chunks = Vec::new();
            for size in sizes {
                let (chunk, tail) = rest.split_at((*size).min(rest.len()));
                chunks.push(chunk);
                rest = tail;
            }
            chunks.push(rest);
            out.extend(encode_chunks(&chunks).unwrap());
        }
    }
    out
}

fn body_of(events: &[HttpEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            HttpEvent::Body(b) => Some(b.as_slice()),
            _ => None,
        })
        .flatten()
        .copied()
        .collect()
}

fn limits() -> DecoderLimits {
    DecoderLimits {
        body_piece_size: 32,
        ..Default::default()
    }
}

proptest! {
    #[test]
    fn request_split_invariance(
        method in http_method(),
        target in http_target(),
        headers in plain_headers(),
        body in proptest::collection::vec(any::<u8>(), 0..200),
        framing in framing(),
        points in split_points(1024)
    ) {
        let mut input = b"\r\n".to_vec();
        input.extend(message(&format!("{method} {target} HTTP/1.1"), &headers, &body, &framing));
        // 2 つ目のメッセージをパイプライン化する
        input.extend_from_slice(b"GET /next HTTP/1.1\r\n\r\n");

        let mut whole = RequestDecoder::with_limits(limits()).unwrap();
        let expected = feed_pieces(&mut whole, &[input.as_slice()]);
        let mut split = RequestDecoder::with_limits(limits()).unwrap();
        let actual = feed_pieces(&mut split, &split_at_points(&input, &points));
        prop_assert_eq!(&actual, &expected);
        prop_assert!(expected.error.is_none(), "{:?}", expected.error);
        prop_assert_eq!(expected.accepted, input.len());

        let whole_events: Vec<_> = std::iter::from_fn(|| whole.next_event()).collect();
        let split_events: Vec<_> = std::iter::from_fn(|| split.next_event()).collect();
        prop_assert_eq!(&whole_events, &split_events);

        let headers_seen: Vec<(String, String)> = whole_events
            .iter()
            .filter_map(|e| match e {
                HttpEvent::Header { name, value } => Some((name.clone(), value.clone())),
                _ => None,
            })
            .collect();
        prop_assert!(headers_seen.starts_with(&headers));
        prop_assert_eq!(body_of(&whole_events), body);
        let completed = whole_events
            .iter()
            .filter(|e| **e == HttpEvent::MessageComplete)
            .count();
        prop_assert_eq!(completed, 2);
        prop_assert!(!whole.in_message());
    }

    #[test]
    fn response_close_delimited(
        code in status_code(),
        headers in plain_headers(),
        body in proptest::collection::vec(any::<u8>(), 0..300),
        points in split_points(1024)
    ) {
        prop_assume!(code != 204 && code != 304);
        let mut input = format!("HTTP/1.1 {code} Reason\r\n").into_bytes();
        for (name, value) in &headers {
            input.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        input.extend_from_slice(b"\r\n");
        input.extend_from_slice(&body);

        let mut decoder = ResponseDecoder::with_limits(limits()).unwrap();
        let outcome = feed_pieces(&mut decoder, &split_at_points(&input, &points));
        prop_assert!(outcome.error.is_none());
        prop_assert!(!outcome.finished);
        decoder.end_of_stream().unwrap();
        prop_assert!(decoder.is_finished());

        let events: Vec<_> = std::iter::from_fn(|| decoder.next_event()).collect();
        prop_assert!(events.contains(&HttpEvent::HeadersComplete(BodyKind::CloseDelimited)));
        prop_assert_eq!(body_of(&events), body);
        prop_assert_eq!(events.last(), Some(&HttpEvent::MessageComplete));
    }
}
