//! 値の寿命管理
//!
//! 評価セッション中に実体化された値はすべてアリーナに登録され、
//! セッション終了時にまとめて解放されます。個々のノードが解放することはありません。

use crate::value::Value;

/// アリーナ内の値を指すハンドル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueHandle {
    generation: u64,
    index: usize,
}

impl ValueHandle {
    /// 登録時のセッション世代
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// アリーナ内のインデックス
    pub fn index(&self) -> usize {
        self.index
    }
}

/// 評価結果（アリーナに登録済みの値）
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    handle: ValueHandle,
    value: Value,
}

impl EvaluationResult {
    pub(crate) fn new(handle: ValueHandle, value: Value) -> Self {
        Self { handle, value }
    }

    /// アリーナ上のハンドル
    pub fn handle(&self) -> ValueHandle {
        self.handle
    }

    /// 値
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// 値を取り出す
    pub fn into_value(self) -> Value {
        self.value
    }
}

/// 値アリーナ
///
/// 世代番号はセッションが終了するたびに進み、古い世代のハンドルは解決できなくなる。
pub struct ValueArena {
    generation: u64,
    values: Vec<Value>,
}

impl ValueArena {
    /// 新しいアリーナを作成する
    pub fn new() -> Self {
        Self {
            generation: 0,
            values: Vec::new(),
        }
    }

    /// 現在のセッション世代
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 値を登録する
    pub fn record(&mut self, value: Value) -> EvaluationResult {
        let handle = ValueHandle {
            generation: self.generation,
            index: self.values.len(),
        };
        self.values.push(value.clone());
        EvaluationResult::new(handle, value)
    }

    /// ハンドルから値を取得する
    pub fn get(&self, handle: ValueHandle) -> Option<&Value> {
        if handle.generation != self.generation {
            return None;
        }
        self.values.get(handle.index)
    }

    /// 登録されている値の数
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 登録されている値がないか
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// すべての値を解放して世代を進める
    ///
    /// 解放した値の数を返します。
    pub fn release_all(&mut self) -> usize {
        let released = self.values.len();
        self.values.clear();
        self.generation += 1;
        released
    }
}

impl Default for ValueArena {
    fn default() -> Self {
        Self::new()
    }
}
