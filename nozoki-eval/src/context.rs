//! 評価コンテキストとスタックフレーム
//!
//! どちらも呼び出し側が構築して渡す読み取り専用のデータで、このクレートが生成することはない。

use crate::types::TypeInfo;

/// インスペクション設定
#[derive(Debug, Clone)]
pub struct InspectConfig {
    /// フォーマット時の最大深さ（再帰制限）
    pub max_depth: usize,
    /// 配列の最大表示要素数
    pub max_array_elements: usize,
    /// 子要素を一度に取得する既定の件数
    pub children_page_size: usize,
}

impl Default for InspectConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_array_elements: 16,
            children_page_size: 100,
        }
    }
}

/// 評価コンテキスト（デバッグ対象・セッション単位の状態）
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub config: InspectConfig,
}

impl EvaluationContext {
    /// 設定を指定してコンテキストを作成する
    pub fn new(config: InspectConfig) -> Self {
        Self { config }
    }
}

/// フレームのローカル変数
#[derive(Debug, Clone)]
pub struct FrameLocal {
    /// 変数名
    pub name: String,
    /// 変数のアドレス
    pub address: u64,
    /// 型情報
    pub type_info: TypeInfo,
}

impl FrameLocal {
    /// ローカル変数を作成する
    pub fn new(name: impl Into<String>, address: u64, type_info: TypeInfo) -> Self {
        Self {
            name: name.into(),
            address,
            type_info,
        }
    }
}

/// スタックフレーム（実行位置の状態）
#[derive(Debug, Clone, Default)]
pub struct StackFrame {
    /// プログラムカウンタ
    pub pc: u64,
    /// フレームベース（RBP）
    pub frame_base: u64,
    /// ローカル変数（宣言順）
    pub locals: Vec<FrameLocal>,
}

impl StackFrame {
    /// 名前でローカル変数を探す
    ///
    /// シャドーイングされている場合は後に宣言されたものを返します。
    pub fn find_local(&self, name: &str) -> Option<&FrameLocal> {
        self.locals.iter().rev().find(|l| l.name == name)
    }
}
