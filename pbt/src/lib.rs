//! PBT テスト共通ユーティリティ

use proptest::prelude::*;
use shiguredo_framing::{Error, Sink, WriteError};

// ========================================
// 入力の分割
// ========================================

/// 分割位置 (入力長を超える値は末尾に丸められる)
pub fn split_points(max_len: usize) -> impl Strategy<Value = Vec<usize>> {
    proptest::collection::vec(0..=max_len, 0..8)
}

/// 分割位置で入力を分ける
///
/// 空の断片も含まれ得る
pub fn split_at_points<'a>(data: &'a [u8], points: &[usize]) -> Vec<&'a [u8]> {
    let mut points: Vec<usize> = points.iter().map(|p| (*p).min(data.len())).collect();
    points.sort_unstable();

    let mut pieces = Vec::with_capacity(points.len() + 1);
    let mut start = 0;
    for p in points {
        pieces.push(&data[start..p]);
        start = p;
    }
    pieces.push(&data[start..]);
    pieces
}

/// 書き込み結果のまとめ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedOutcome {
    /// 受け入れた合計バイト数
    pub accepted: usize,
    /// 完了したかどうか
    pub finished: bool,
    /// 失敗した場合のステージ名とエラー
    pub error: Option<(&'static str, Error)>,
}

/// 断片を順に書き込む
///
/// 完了するか失敗した時点で止める
pub fn feed_pieces<S: Sink + ?Sized>(sink: &mut S, pieces: &[&[u8]]) -> FeedOutcome {
    let mut outcome = FeedOutcome {
        accepted: 0,
        finished: false,
        error: None,
    };
    for piece in pieces {
        match sink.write(piece) {
            Ok(r) => {
                outcome.accepted += r.accepted;
                if r.finished {
                    outcome.finished = true;
                    break;
                }
            }
            Err(WriteError {
                accepted,
                stage,
                error,
            }) => {
                outcome.accepted += accepted;
                outcome.error = Some((stage, error));
                break;
            }
        }
    }
    outcome
}

/// 失敗を比較用にエラーの種類だけにする
///
/// `CapacityExceeded` の `size` は分割のされ方で変わるため比較しない
pub fn error_kind(error: &Option<(&'static str, Error)>) -> Option<(&'static str, String)> {
    error.as_ref().map(|(stage, e)| {
        let kind = match e {
            Error::CapacityExceeded { limit, .. } => format!("capacity exceeded ({limit})"),
            other => other.to_string(),
        };
        (*stage, kind)
    })
}

// ========================================
// 文字列の生成
// ========================================

/// トークン文字 (RFC 9110 Section 5.6.2 の一部)
pub fn token_char() -> impl Strategy<Value = char> {
    prop_oneof![
        prop::char::range('a', 'z'),
        prop::char::range('A', 'Z'),
        prop::char::range('0', '9'),
        Just('-'),
        Just('_'),
        Just('.'),
        Just('!'),
        Just('~'),
    ]
}

/// トークン
pub fn token_string(max_len: usize) -> impl Strategy<Value = String> {
    proptest::collection::vec(token_char(), 1..=max_len)
        .prop_map(|chars| chars.into_iter().collect())
}

/// ヘッダー名
pub fn header_name() -> impl Strategy<Value = String> {
    token_string(24)
}

/// ヘッダー値 (前後に空白を含まない)
pub fn header_value() -> impl Strategy<Value = String> {
    "[!-~]([ !-~]{0,30}[!-~])?".prop_map(|s| s)
}

/// ヘッダーリスト
pub fn headers(max: usize) -> impl Strategy<Value = Vec<(String, String)>> {
    proptest::collection::vec((header_name(), header_value()), 0..=max)
}

/// multipart 境界 (RFC 2046 bchars)
pub fn boundary() -> impl Strategy<Value = String> {
    "[0-9A-Za-z'()+_,./:=?-]{1,40}".prop_map(|s| s)
}

/// 区切り文字が現れやすいバイト列
pub fn framing_bytes(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(
        prop_oneof![
            3 => any::<u8>(),
            2 => Just(b'\r'),
            2 => Just(b'\n'),
            1 => Just(b'-'),
        ],
        0..=max_len,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_at_points() {
        let pieces = split_at_points(b"abcdef", &[4, 1, 100, 1]);
        assert_eq!(
            pieces,
            vec![&b"a"[..], &b""[..], &b"bcd"[..], &b"ef"[..], &b""[..]]
        );
        assert_eq!(split_at_points(b"", &[]), vec![&b""[..]]);
    }
}
