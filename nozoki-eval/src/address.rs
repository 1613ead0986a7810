//! アドレスを持つ値
//!
//! デバッグ対象上のアドレスに置かれ、ランタイムアダプタ経由で読み書きできる値です。
//! メモリを所有するのではなく、「アドレス + 型」という読み書きの権限を表します。

use crate::arena::EvaluationResult;
use crate::errors::Result;
use crate::runtime::RuntimeAdapter;
use crate::types::TypeInfo;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// アドレスを持つ値
///
/// 種類は閉じた列挙で、等価判定と読み書きの振り分けはここで網羅されます。
#[derive(Debug, Clone)]
pub enum AddressValue {
    /// 参照・ポインタのセルを1段辿った先
    Indirect(IndirectValue),
    /// 固定アドレス（ローカル変数、フィールド、配列要素）
    Location(LocationValue),
}

impl AddressValue {
    /// 値の静的な型
    pub fn type_info(&self) -> &TypeInfo {
        match self {
            AddressValue::Indirect(v) => v.type_info(),
            AddressValue::Location(v) => v.type_info(),
        }
    }

    /// 現在の値を読み取る
    ///
    /// 格納場所が無効になっていれば `None`。アダプタの障害のみエラーになる。
    pub fn read(&self, token: &CancellationToken) -> Result<Option<EvaluationResult>> {
        match self {
            AddressValue::Indirect(v) => v.read(token),
            AddressValue::Location(v) => v.read(token),
        }
    }

    /// 値を書き込む
    pub fn write(&self, value: &Value, token: &CancellationToken) -> Result<()> {
        match self {
            AddressValue::Indirect(v) => v.write(value, token),
            AddressValue::Location(v) => v.write(value, token),
        }
    }
}

impl PartialEq for AddressValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AddressValue::Indirect(a), AddressValue::Indirect(b)) => a == b,
            (AddressValue::Location(a), AddressValue::Location(b)) => a == b,
            _ => false,
        }
    }
}

/// 間接参照値
///
/// 参照セル（参照先ではなくセル自身）を保持し、読み書きはアダプタの
/// `load_indirect` / `store_indirect` に委譲します。
#[derive(Clone)]
pub struct IndirectValue {
    runtime: Arc<dyn RuntimeAdapter>,
    type_info: TypeInfo,
    reference: Value,
}

impl IndirectValue {
    /// 参照セルから間接参照値を作成する
    ///
    /// セルがポインタ・参照型でない、または参照先の型が不明なら `None`。
    pub fn new(runtime: Arc<dyn RuntimeAdapter>, reference: Value) -> Option<Self> {
        let type_info = reference.type_info().element_type()?.clone();
        Some(Self {
            runtime,
            type_info,
            reference,
        })
    }

    /// 参照先の型
    pub fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    /// 参照セル
    pub fn reference(&self) -> &Value {
        &self.reference
    }

    /// 参照先を読み取る
    ///
    /// 読み取った値は返す前に寿命管理へ登録される。
    pub fn read(&self, token: &CancellationToken) -> Result<Option<EvaluationResult>> {
        match self.runtime.load_indirect(&self.reference, token)? {
            Some(value) => Ok(Some(self.runtime.record_value(value))),
            None => Ok(None),
        }
    }

    /// 参照先に書き込む
    pub fn write(&self, value: &Value, token: &CancellationToken) -> Result<()> {
        self.runtime.store_indirect(&self.reference, value, token)
    }
}

impl PartialEq for IndirectValue {
    /// 参照セルの格納場所の同一性で比較する（読み取った内容は比較しない）
    fn eq(&self, other: &Self) -> bool {
        self.runtime.values_equal(&self.reference, &other.reference)
    }
}

impl fmt::Debug for IndirectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndirectValue")
            .field("type_info", &self.type_info.name())
            .field("reference", &self.reference)
            .finish()
    }
}

/// 固定アドレスの値
#[derive(Clone)]
pub struct LocationValue {
    runtime: Arc<dyn RuntimeAdapter>,
    address: u64,
    type_info: TypeInfo,
}

impl LocationValue {
    /// 固定アドレスの値を作成する
    pub fn new(runtime: Arc<dyn RuntimeAdapter>, address: u64, type_info: TypeInfo) -> Self {
        Self {
            runtime,
            address,
            type_info,
        }
    }

    /// アドレス
    pub fn address(&self) -> u64 {
        self.address
    }

    /// 型
    pub fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    /// 現在の値を読み取る
    pub fn read(&self, token: &CancellationToken) -> Result<Option<EvaluationResult>> {
        match self.runtime.load(self.address, &self.type_info, token)? {
            Some(value) => Ok(Some(self.runtime.record_value(value))),
            None => Ok(None),
        }
    }

    /// 値を書き込む
    pub fn write(&self, value: &Value, token: &CancellationToken) -> Result<()> {
        self.runtime.store(self.address, &self.type_info, value, token)
    }
}

impl PartialEq for LocationValue {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.type_info.size() == other.type_info.size()
    }
}

impl fmt::Debug for LocationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationValue")
            .field("address", &format_args!("0x{:x}", self.address))
            .field("type_info", &self.type_info.name())
            .finish()
    }
}
