//! エラー型とエラーメッセージ定数

use crate::expr_eval::ExpressionError;
use tokio_util::sync::CancellationToken;

/// 値の評価・インスペクション中のエラー
///
/// 「値が存在しない」（nullの参照先など）はエラーではなく `Option::None` で表す。
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// キャンセルトークンが発火した
    #[error("Operation was cancelled")]
    Cancelled,

    /// 評価セッションが終了した後にノードや値が使われた
    #[error("Evaluation session has ended")]
    Invalidated,

    /// 型不一致などの想定内の評価失敗
    #[error("{0}")]
    Evaluation(String),

    /// 式の解析・解決の失敗
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    /// ランタイムアダプタ（デバッグ対象との通信層）自体の障害
    #[error("Runtime adapter fault: {0}")]
    Adapter(#[from] anyhow::Error),
}

impl EvalError {
    /// キャンセルによる中断かどうか
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EvalError::Cancelled)
    }

    /// ノードや代入結果にデータとして載せるべきエラーならそのメッセージを返す
    ///
    /// キャンセル、セッション無効化、アダプタ障害は呼び出し元へ伝播させるので `None`。
    pub fn structured_message(&self) -> Option<String> {
        match self {
            EvalError::Evaluation(msg) => Some(msg.clone()),
            EvalError::Expression(e) => Some(e.to_string()),
            EvalError::Cancelled | EvalError::Invalidated | EvalError::Adapter(_) => None,
        }
    }
}

/// 評価処理の結果型
pub type Result<T> = std::result::Result<T, EvalError>;

/// デバッグ対象との往復の前に呼ぶチェックポイント
pub fn check_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(EvalError::Cancelled)
    } else {
        Ok(())
    }
}

/// 書き込めない値に代入しようとした場合のエラーメッセージ
pub const ERR_READ_ONLY: &str = "Expression is read-only";

/// アドレスを持たない値に代入しようとした場合のエラーメッセージ
pub const ERR_CANNOT_ASSIGN: &str = "Expression cannot be assigned to";

/// 値を読み取れない場合のエラーメッセージ
pub const ERR_VALUE_UNAVAILABLE: &str = "Value is not available";

/// 書き込めないメモリに代入しようとした場合のエラーメッセージ
pub const ERR_NOT_WRITABLE: &str = "Target memory is not writable";

/// nullの参照・ポインタを辿ろうとした場合のエラーメッセージ
pub const ERR_NULL_REFERENCE: &str = "Null reference";

/// 副作用のある式を許可なしにフォーマットしようとした場合のメッセージ
pub const ERR_SIDE_EFFECTS: &str = "Expression causes side effects and was not evaluated";

/// 参照型でない値を間接参照しようとした場合のエラーメッセージ
pub const ERR_NOT_A_REFERENCE: &str = "Value is not a reference or pointer";
