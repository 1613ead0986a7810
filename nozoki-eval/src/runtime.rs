//! ランタイムアダプタ
//!
//! デバッグ対象に対する実際の読み書き、値の同一性判定、値の寿命登録を担当します。
//! インスペクションの全操作はこのアダプタを通してのみデバッグ対象に触れます。

use crate::arena::{EvaluationResult, ValueArena, ValueHandle};
use crate::errors::{
    check_cancelled, EvalError, Result, ERR_NOT_A_REFERENCE, ERR_NOT_WRITABLE, ERR_NULL_REFERENCE,
};
use crate::types::TypeInfo;
use crate::value::Value;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// デバッグ対象メモリへのアクセス
///
/// ライブプロセス（`/proc/pid/mem`）やテスト用のバイト列など、バックエンドを抽象化します。
pub trait TargetMemory: Send + Sync {
    /// メモリからデータを読み取る
    fn read(&self, addr: usize, size: usize) -> anyhow::Result<Vec<u8>>;

    /// メモリにデータを書き込む
    ///
    /// 一度の呼び出しで全バイトを書き込むか、何も書き込まないかのどちらかでなければならない。
    fn write(&self, addr: usize, data: &[u8]) -> anyhow::Result<()>;

    /// 指定範囲が読み取り可能なマッピング内にあるか
    fn is_mapped(&self, addr: usize, size: usize) -> anyhow::Result<bool>;

    /// 指定範囲全体が書き込み可能なマッピング内にあるか
    fn is_writable(&self, addr: usize, size: usize) -> anyhow::Result<bool>;
}

/// ランタイムアダプタ
pub trait RuntimeAdapter: Send + Sync {
    /// 参照セルを1段だけ辿って値を読み取る
    ///
    /// nullや無効なセルの場合は `Ok(None)` を返します。
    fn load_indirect(&self, cell: &Value, token: &CancellationToken) -> Result<Option<Value>>;

    /// 参照セルの参照先に値を書き込む
    ///
    /// 型検査と変換はアダプタが行います。
    fn store_indirect(&self, cell: &Value, value: &Value, token: &CancellationToken) -> Result<()>;

    /// 固定アドレスから値を読み取る
    fn load(
        &self,
        address: u64,
        type_info: &TypeInfo,
        token: &CancellationToken,
    ) -> Result<Option<Value>>;

    /// 固定アドレスに値を書き込む
    fn store(
        &self,
        address: u64,
        type_info: &TypeInfo,
        value: &Value,
        token: &CancellationToken,
    ) -> Result<()>;

    /// 実体化した値を寿命管理に登録する
    fn record_value(&self, value: Value) -> EvaluationResult;

    /// 登録済みの値をハンドルから取得する
    fn resolve(&self, handle: ValueHandle) -> Option<Value>;

    /// 2つの値が同じ格納場所を指すか（内容の比較ではない）
    fn values_equal(&self, a: &Value, b: &Value) -> bool;

    /// 現在の評価セッションの世代
    fn generation(&self) -> u64;

    /// 評価セッションを終了し、登録済みの値をすべて解放する
    fn end_session(&self) -> usize;
}

/// メモリバックエンド上のランタイムアダプタ
pub struct TargetRuntime<M: TargetMemory> {
    memory: M,
    arena: Mutex<ValueArena>,
}

impl<M: TargetMemory> TargetRuntime<M> {
    /// 新しいランタイムを作成する
    pub fn new(memory: M) -> Self {
        Self {
            memory,
            arena: Mutex::new(ValueArena::new()),
        }
    }

    /// メモリバックエンドを取得する
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// 登録済みの値の数
    pub fn recorded_values(&self) -> usize {
        self.arena().len()
    }

    fn arena(&self) -> MutexGuard<'_, ValueArena> {
        // 登録処理はパニックしないので、ポイズンされていても中身は整合している
        self.arena.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 参照セルから参照先のアドレスと型を取り出す
    fn cell_target<'v>(&self, cell: &'v Value) -> Result<(u64, &'v TypeInfo)> {
        let target_type = cell
            .type_info()
            .element_type()
            .ok_or_else(|| EvalError::Evaluation(ERR_NOT_A_REFERENCE.to_string()))?;
        let address = cell
            .target_address()
            .ok_or_else(|| EvalError::Evaluation(ERR_NOT_A_REFERENCE.to_string()))?;
        Ok((address, target_type))
    }
}

impl<M: TargetMemory> RuntimeAdapter for TargetRuntime<M> {
    fn load_indirect(&self, cell: &Value, token: &CancellationToken) -> Result<Option<Value>> {
        check_cancelled(token)?;
        let (address, target_type) = self.cell_target(cell)?;
        if address == 0 {
            trace!("load_indirect: null cell at {:?}", cell.address());
            return Ok(None);
        }
        self.load(address, target_type, token)
    }

    fn store_indirect(&self, cell: &Value, value: &Value, token: &CancellationToken) -> Result<()> {
        check_cancelled(token)?;
        let (address, target_type) = self.cell_target(cell)?;
        if address == 0 {
            return Err(EvalError::Evaluation(ERR_NULL_REFERENCE.to_string()));
        }
        self.store(address, target_type, value, token)
    }

    fn load(
        &self,
        address: u64,
        type_info: &TypeInfo,
        token: &CancellationToken,
    ) -> Result<Option<Value>> {
        check_cancelled(token)?;

        let size = type_info.size() as usize;
        if size == 0 || address == 0 {
            return Ok(None);
        }
        if !self.memory.is_mapped(address as usize, size)? {
            trace!("load: 0x{:x} ({} bytes) is not mapped", address, size);
            return Ok(None);
        }

        trace!("load: 0x{:x} as {}", address, type_info.name());
        let bytes = self.memory.read(address as usize, size)?;
        let value = Value::new(type_info.clone(), Some(address), bytes).ok_or_else(|| {
            anyhow::anyhow!("Short read at 0x{:x} (expected {} bytes)", address, size)
        })?;
        Ok(Some(value))
    }

    fn store(
        &self,
        address: u64,
        type_info: &TypeInfo,
        value: &Value,
        token: &CancellationToken,
    ) -> Result<()> {
        // 変換を先に済ませ、失敗したら何も書き込まない
        let bytes = value.convert_to(type_info).map_err(EvalError::Evaluation)?;

        check_cancelled(token)?;
        // 一部だけ書き込まれるのを防ぐため、範囲全体を先に確認する
        if address == 0 || !self.memory.is_writable(address as usize, bytes.len())? {
            debug!("store: 0x{:x} ({} bytes) is not writable", address, bytes.len());
            return Err(EvalError::Evaluation(format!(
                "{} at 0x{:x}",
                ERR_NOT_WRITABLE, address
            )));
        }

        trace!("store: {} bytes to 0x{:x} as {}", bytes.len(), address, type_info.name());
        self.memory.write(address as usize, &bytes)?;
        Ok(())
    }

    fn record_value(&self, value: Value) -> EvaluationResult {
        self.arena().record(value)
    }

    fn resolve(&self, handle: ValueHandle) -> Option<Value> {
        self.arena().get(handle).cloned()
    }

    fn values_equal(&self, a: &Value, b: &Value) -> bool {
        if a.type_info().is_indirection() && b.type_info().is_indirection() {
            // 参照先の格納場所で比較する。nullはセル自身の位置で区別する
            match (a.target_address(), b.target_address()) {
                (Some(x), Some(y)) if x != 0 && y != 0 => {
                    let size = |v: &Value| v.type_info().element_type().map(TypeInfo::size);
                    return x == y && size(a) == size(b);
                }
                _ => {}
            }
        } else if a.type_info().is_indirection() != b.type_info().is_indirection() {
            return false;
        }

        match (a.address(), b.address()) {
            (Some(x), Some(y)) => x == y && a.type_info().size() == b.type_info().size(),
            _ => false,
        }
    }

    fn generation(&self) -> u64 {
        self.arena().generation()
    }

    fn end_session(&self) -> usize {
        let released = self.arena().release_all();
        debug!("evaluation session ended, released {} values", released);
        released
    }
}
