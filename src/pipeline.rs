//! ステージを連結するパイプライン
//!
//! パイプラインは現在のステージにだけ入力を渡し、ステージが完了するたびに
//! プロトコル固有の [`Protocol::advance`] を呼んで次のステージを選ぶ。
//! 1 回の [`Pipeline::feed`] の中で、入力を使い切るかステージがデータ不足になるまで
//! 次々とステージを切り替えて処理を進める。
//!
//! ステージはアリーナ ([`Stages`]) に格納され、[`StageId`] で参照される。

use std::collections::VecDeque;
use std::ops::{Index, IndexMut};

use tracing::{debug, trace};

use crate::error::{Error, WriteError};
use crate::sink::{Sink, WriteResult};
use crate::stage::Stage;

/// ステージ識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageId(usize);

/// ステージのアリーナ
#[derive(Debug, Default)]
pub struct Stages {
    stages: Vec<Stage>,
}

impl Stages {
    /// 空のアリーナを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// ステージを登録
    pub fn add(&mut self, stage: Stage) -> StageId {
        self.stages.push(stage);
        StageId(self.stages.len() - 1)
    }

    /// ステージを取得
    pub fn get(&self, id: StageId) -> Option<&Stage> {
        self.stages.get(id.0)
    }

    /// ステージを可変で取得
    pub fn get_mut(&mut self, id: StageId) -> Option<&mut Stage> {
        self.stages.get_mut(id.0)
    }

    /// 登録済みのステージ数
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// 空かどうか
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn clear(&mut self) {
        self.stages.clear();
    }
}

impl Index<StageId> for Stages {
    type Output = Stage;

    fn index(&self, id: StageId) -> &Stage {
        &self.stages[id.0]
    }
}

impl IndexMut<StageId> for Stages {
    fn index_mut(&mut self, id: StageId) -> &mut Stage {
        &mut self.stages[id.0]
    }
}

/// プロトコル固有のステージ遷移
pub trait Protocol {
    /// 呼び出し側へ渡すトークン
    type Token;

    /// ステージを登録して最初のステージを返す
    ///
    /// [`Pipeline::restart`] でも呼ばれるため、プロトコル自身の状態もここで初期化する
    fn init(&mut self, stages: &mut Stages) -> Result<StageId, Error>;

    /// 完了したステージを受け取り、次のステージを返す
    ///
    /// `None` を返すとパイプラインは終了する。
    /// 返したステージはパイプラインがリセットしてから入力を渡す。
    fn advance(
        &mut self,
        completed: StageId,
        stages: &mut Stages,
        out: &mut VecDeque<Self::Token>,
    ) -> Result<Option<StageId>, Error>;

    /// パイプライン終了時に呼ばれる
    fn finish(&mut self, _out: &mut VecDeque<Self::Token>) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug)]
enum PipelineState {
    Running(StageId),
    Finished,
    Failed(WriteError),
}

/// パイプライン
///
/// 1 つのインスタンスは 1 つの接続 (ストリーム) 専用で、内部で同期は行わない。
#[derive(Debug)]
pub struct Pipeline<P: Protocol> {
    protocol: P,
    stages: Stages,
    state: PipelineState,
    /// 次のステージへ引き渡す受け入れ済みバイト列
    carry: Vec<u8>,
    tokens: VecDeque<P::Token>,
}

impl<P: Protocol> Pipeline<P> {
    /// プロトコルの `init` を呼んでパイプラインを開始
    pub fn start(mut protocol: P) -> Result<Self, Error> {
        let mut stages = Stages::new();
        let first = protocol.init(&mut stages)?;
        Ok(Self {
            protocol,
            stages,
            state: PipelineState::Running(first),
            carry: Vec::new(),
            tokens: VecDeque::new(),
        })
    }

    /// ステージを作り直して新しいサイクルを開始
    ///
    /// 取り出されていないトークンは破棄される
    pub fn restart(&mut self) -> Result<(), Error> {
        self.stages.clear();
        self.carry.clear();
        self.tokens.clear();
        let first = self.protocol.init(&mut self.stages)?;
        self.state = PipelineState::Running(first);
        Ok(())
    }

    /// プロトコル
    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// プロトコル (可変)
    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }

    /// 登録済みのステージ
    pub fn stages(&self) -> &Stages {
        &self.stages
    }

    /// 現在のステージ
    pub fn current_stage(&self) -> Option<&Stage> {
        match self.state {
            PipelineState::Running(id) => Some(&self.stages[id]),
            _ => None,
        }
    }

    /// 終了したかどうか
    pub fn is_finished(&self) -> bool {
        matches!(self.state, PipelineState::Finished)
    }

    /// 失敗したかどうか
    pub fn is_failed(&self) -> bool {
        matches!(self.state, PipelineState::Failed(_))
    }

    /// 終了後に残った受け入れ済みバイト列
    pub fn carry_over(&self) -> &[u8] {
        &self.carry
    }

    /// 次のトークンを取り出す
    pub fn next_token(&mut self) -> Option<P::Token> {
        self.tokens.pop_front()
    }

    /// トークンが溜まっているかどうか
    pub fn has_tokens(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// 溜まっているトークンをすべて取り出す
    pub fn drain_tokens(&mut self) -> impl Iterator<Item = P::Token> + '_ {
        self.tokens.drain(..)
    }

    /// データを投入
    ///
    /// 入力を使い切るか、現在のステージがデータ不足になるまで処理を進める。
    /// パイプラインが終了した場合、残りの入力は受け入れない。
    pub fn feed(&mut self, data: &[u8]) -> Result<WriteResult, WriteError> {
        let mut offset = 0;
        loop {
            let id = match &self.state {
                PipelineState::Running(id) => *id,
                PipelineState::Finished => return Ok(WriteResult::finished(offset)),
                PipelineState::Failed(e) => return Err(e.clone().with_accepted(offset)),
            };

            if !self.stages[id].is_done() {
                let result = if self.carry.is_empty() {
                    self.stages[id]
                        .feed(&data[offset..])
                        .map(|r| {
                            offset += r.accepted;
                            r
                        })
                        .map_err(|e| {
                            let accepted = offset + e.accepted;
                            e.with_accepted(accepted)
                        })
                } else {
                    self.stages[id]
                        .feed(&self.carry)
                        .map(|r| {
                            self.carry.drain(..r.accepted);
                            r
                        })
                        .map_err(|e| e.with_accepted(offset))
                };

                match result {
                    Ok(r) if r.finished => {}
                    Ok(_) => {
                        if self.carry.is_empty() && offset == data.len() {
                            return Ok(WriteResult::more(offset));
                        }
                        continue;
                    }
                    Err(e) => return Err(self.fail(e)),
                }
            }

            self.advance(id).map_err(|e| e.with_accepted(offset))?;
        }
    }

    /// ストリーム終了を通知
    ///
    /// 現在のステージに終了を伝え、完了したステージがある限り遷移を続ける。
    pub fn end_of_stream(&mut self) -> Result<(), WriteError> {
        debug!("end of stream");
        loop {
            let id = match &self.state {
                PipelineState::Running(id) => *id,
                PipelineState::Finished => return Ok(()),
                PipelineState::Failed(e) => return Err(e.clone().with_accepted(0)),
            };

            if !self.carry.is_empty() {
                // 引き渡し分を先に処理する
                self.feed(&[])?;
                continue;
            }

            if !self.stages[id].is_done() {
                if let Err(e) = self.stages[id].end_of_stream() {
                    return Err(self.fail(e));
                }
            }

            self.advance(id)?;
        }
    }

    /// 完了したステージから次のステージへ遷移
    fn advance(&mut self, completed: StageId) -> Result<(), WriteError> {
        let excess = self.stages[completed].take_excess();
        if !excess.is_empty() {
            let rest = std::mem::replace(&mut self.carry, excess);
            self.carry.extend_from_slice(&rest);
        }

        let name = self.stages[completed].name();
        let next = self
            .protocol
            .advance(completed, &mut self.stages, &mut self.tokens)
            .map_err(|e| self.fail(WriteError::new(0, name, e)))?;

        match next {
            Some(next) => {
                trace!(from = name, to = self.stages[next].name(), "stage hand-off");
                self.stages[next].reset();
                self.state = PipelineState::Running(next);
            }
            None => {
                self.protocol
                    .finish(&mut self.tokens)
                    .map_err(|e| self.fail(WriteError::new(0, name, e)))?;
                trace!(last = name, "pipeline finished");
                self.state = PipelineState::Finished;
            }
        }
        Ok(())
    }

    fn fail(&mut self, e: WriteError) -> WriteError {
        debug!(stage = e.stage, accepted = e.accepted, error = %e.error, "pipeline failed");
        self.state = PipelineState::Failed(e.clone());
        e
    }
}

impl<P: Protocol> Sink for Pipeline<P> {
    fn write(&mut self, data: &[u8]) -> Result<WriteResult, WriteError> {
        self.feed(data)
    }

    fn end_of_stream(&mut self) -> Result<(), WriteError> {
        Pipeline::end_of_stream(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::ParseMode;

    /// "名前:" の後に 4 バイト固定の値が続く単純なプロトコル
    #[derive(Debug, Default)]
    struct KeyValue {
        key: Option<StageId>,
        value: Option<StageId>,
        current_key: Vec<u8>,
        remaining: usize,
    }

    impl Protocol for KeyValue {
        type Token = (Vec<u8>, Vec<u8>);

        fn init(&mut self, stages: &mut Stages) -> Result<StageId, Error> {
            let key = stages.add(Stage::new("key", ParseMode::delimiter(b":"), 16)?);
            let value = stages.add(Stage::new("value", ParseMode::FixedSize(4), 4)?);
            self.key = Some(key);
            self.value = Some(value);
            self.remaining = 2;
            Ok(key)
        }

        fn advance(
            &mut self,
            completed: StageId,
            stages: &mut Stages,
            out: &mut VecDeque<Self::Token>,
        ) -> Result<Option<StageId>, Error> {
            if Some(completed) == self.key {
                self.current_key = stages[completed].take_content();
                return Ok(self.value);
            }
            let value = stages[completed].take_content();
            out.push_back((std::mem::take(&mut self.current_key), value));
            self.remaining -= 1;
            if self.remaining == 0 {
                Ok(None)
            } else {
                Ok(self.key)
            }
        }
    }

    #[test]
    fn test_single_feed_drives_all_stages() {
        let mut pipeline = Pipeline::start(KeyValue::default()).unwrap();
        let r = pipeline.feed(b"ab:1234cd:5678trailing").unwrap();
        assert_eq!(r, WriteResult::finished(14));
        assert!(pipeline.is_finished());
        let tokens: Vec<_> = pipeline.drain_tokens().collect();
        assert_eq!(
            tokens,
            vec![
                (b"ab".to_vec(), b"1234".to_vec()),
                (b"cd".to_vec(), b"5678".to_vec())
            ]
        );
    }

    #[test]
    fn test_split_invariance() {
        let input = b"ab:1234cd:5678";
        for split in 0..=input.len() {
            let mut pipeline = Pipeline::start(KeyValue::default()).unwrap();
            let r1 = pipeline.feed(&input[..split]).unwrap();
            let r2 = pipeline.feed(&input[split..]).unwrap();
            assert_eq!(r1.accepted + r2.accepted, input.len());
            assert!(pipeline.is_finished());
            assert_eq!(pipeline.drain_tokens().count(), 2);
        }
    }

    #[test]
    fn test_error_halts_pipeline() {
        let mut pipeline = Pipeline::start(KeyValue::default()).unwrap();
        let e = pipeline.feed(b"ab:1234").unwrap();
        assert_eq!(e.accepted, 7);
        let e = pipeline.feed(b"0123456789abcdefXYZ").unwrap_err();
        assert_eq!(e.stage, "key");
        assert_eq!(e.accepted, 16);
        assert!(pipeline.is_failed());

        // 以降も同じエラーを返す
        let e = pipeline.feed(b":").unwrap_err();
        assert_eq!(e.accepted, 0);
        assert_eq!(e.error, Error::CapacityExceeded { size: 19, limit: 16 });
        assert_eq!(pipeline.drain_tokens().count(), 1);
    }

    #[test]
    fn test_end_of_stream_truncation() {
        let mut pipeline = Pipeline::start(KeyValue::default()).unwrap();
        pipeline.feed(b"ab:12").unwrap();
        let e = pipeline.end_of_stream().unwrap_err();
        assert_eq!(e.stage, "value");
        assert_eq!(e.error, Error::PrematureEndOfStream);
    }

    #[test]
    fn test_restart() {
        let mut pipeline = Pipeline::start(KeyValue::default()).unwrap();
        pipeline.feed(b"ab:1234cd:5678").unwrap();
        assert!(pipeline.is_finished());
        pipeline.restart().unwrap();
        assert!(!pipeline.is_finished());
        assert!(!pipeline.has_tokens());
        pipeline.feed(b"x:0000y:1111").unwrap();
        assert_eq!(
            pipeline.next_token(),
            Some((b"x".to_vec(), b"0000".to_vec()))
        );
    }

    /// 重なりのある区切り文字集合で受け入れ済みのバイトが次のステージへ渡ることを確認する
    #[derive(Debug, Default)]
    struct Overlap {
        head: Option<StageId>,
        tail: Option<StageId>,
    }

    impl Protocol for Overlap {
        type Token = Vec<u8>;

        fn init(&mut self, stages: &mut Stages) -> Result<StageId, Error> {
            let head = stages.add(Stage::new(
                "head",
                ParseMode::delimiters(&[b"\r", b"\r\n\r\n"]),
                32,
            )?);
            let tail = stages.add(Stage::new("tail", ParseMode::FixedSize(3), 3)?);
            self.head = Some(head);
            self.tail = Some(tail);
            Ok(head)
        }

        fn advance(
            &mut self,
            completed: StageId,
            stages: &mut Stages,
            out: &mut VecDeque<Self::Token>,
        ) -> Result<Option<StageId>, Error> {
            out.push_back(stages[completed].take_content());
            if Some(completed) == self.head {
                Ok(self.tail)
            } else {
                Ok(None)
            }
        }
    }

    #[test]
    fn test_excess_bytes_are_carried_over() {
        let mut pipeline = Pipeline::start(Overlap::default()).unwrap();
        pipeline.feed(b"a\r\n").unwrap();
        let r = pipeline.feed(b"xy").unwrap();
        assert_eq!(r, WriteResult::finished(2));
        let tokens: Vec<_> = pipeline.drain_tokens().collect();
        assert_eq!(tokens, vec![b"a".to_vec(), b"\nxy".to_vec()]);
    }
}
