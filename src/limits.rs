/// デコーダーの制限設定
///
/// すべてのステージの上限はここから決まる。
/// 上限はメモリ枯渇攻撃への唯一の防御なので、信頼できない入力に `unlimited()` を使ってはならない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderLimits {
    /// 最大行長 (デフォルト: 8KB)
    ///
    /// 行デコーダーの 1 行あたりの最大バイト数。改行文字は含まない。
    pub max_line_size: usize,
    /// 最大ヘッダー行長 (デフォルト: 8KB)
    ///
    /// HTTP のスタートライン、ヘッダー行、トレーラー行、multipart のパートヘッダー行に適用する。
    pub max_header_line_size: usize,
    /// 最大ヘッダーブロック長 (デフォルト: 64KB)
    ///
    /// スタートラインからヘッダー終端までの合計バイト数
    pub max_header_block_size: usize,
    /// 最大ヘッダー数 (デフォルト: 100)
    pub max_headers_count: usize,
    /// 最大チャンクサイズ行長 (デフォルト: 64バイト)
    ///
    /// チャンクサイズは 16 進数で表現されるため、通常は非常に短い。
    /// 例: "FFFFFFFF\r\n" (4GB) でも 10 バイト程度。
    pub max_chunk_line_size: usize,
    /// 最大チャンクサイズ (デフォルト: 16MB)
    ///
    /// チャンクサイズ行で宣言できるサイズの上限
    pub max_chunk_size: usize,
    /// 最大ボディサイズ (デフォルト: 10MB)
    pub max_body_size: usize,
    /// ボディの分割サイズ (デフォルト: 16KB)
    ///
    /// ボディはこのサイズ以下の断片に分けて渡される。
    /// 一度にバッファするボディのサイズはこの値を超えない。
    pub body_piece_size: usize,
    /// multipart のパートあたりの最大コンテンツサイズ (デフォルト: 10MB)
    pub max_multipart_content_size: usize,
    /// multipart の最初の境界より前に許容するバイト数 (デフォルト: 1KB)
    pub max_multipart_preamble_size: usize,
}

impl Default for DecoderLimits {
    fn default() -> Self {
        Self {
            max_line_size: 8 * 1024,                      // 8KB
            max_header_line_size: 8 * 1024,               // 8KB
            max_header_block_size: 64 * 1024,             // 64KB
            max_headers_count: 100,
            max_chunk_line_size: 64,                      // 64 bytes
            max_chunk_size: 16 * 1024 * 1024,             // 16MB
            max_body_size: 10 * 1024 * 1024,              // 10MB
            body_piece_size: 16 * 1024,                   // 16KB
            max_multipart_content_size: 10 * 1024 * 1024, // 10MB
            max_multipart_preamble_size: 1024,            // 1KB
        }
    }
}

impl DecoderLimits {
    /// 制限なしの設定を作成
    ///
    /// `body_piece_size` だけはボディの分割単位なので既定値のまま
    pub fn unlimited() -> Self {
        Self {
            max_line_size: usize::MAX,
            max_header_line_size: usize::MAX,
            max_header_block_size: usize::MAX,
            max_headers_count: usize::MAX,
            max_chunk_line_size: usize::MAX,
            max_chunk_size: usize::MAX,
            max_body_size: usize::MAX,
            body_piece_size: Self::default().body_piece_size,
            max_multipart_content_size: usize::MAX,
            max_multipart_preamble_size: usize::MAX,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), crate::Error> {
        if self.body_piece_size == 0 {
            return Err(crate::Error::InvalidConfig(
                "body_piece_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 上限に区切り文字分を加える
///
/// `usize::MAX` 付近の上限は飽和させる
pub(crate) fn with_delimiter(limit: usize, delimiter_len: usize) -> usize {
    limit.saturating_add(delimiter_len)
}
