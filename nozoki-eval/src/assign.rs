//! 代入結果

use bitflags::bitflags;

bitflags! {
    /// 代入結果のフラグ
    ///
    /// 将来のフラグを受け入れられるように未知のビットも保持する。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AssignmentFlags: u32 {
        /// 値が変化した
        const VALUE_CHANGED = 1 << 0;
        /// 書き込み時に型変換が行われた
        const TYPE_CHANGED = 1 << 1;
        /// 右辺の式を解析できなかった
        const COMPILER_ERROR = 1 << 2;
        /// デバッグ対象のコードを実行した
        const EXECUTED_CODE = 1 << 3;

        const _ = !0;
    }
}

/// 代入結果
///
/// 生成後は変更されない。エラーとフラグは同時に設定されうる（`COMPILER_ERROR` など）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentResult {
    error: Option<String>,
    flags: AssignmentFlags,
}

impl AssignmentResult {
    /// 代入結果を作成する
    pub fn new(error: Option<String>, flags: AssignmentFlags) -> Self {
        Self { error, flags }
    }

    /// 成功した代入結果
    pub fn success(flags: AssignmentFlags) -> Self {
        Self::new(None, flags)
    }

    /// 失敗した代入結果
    pub fn error(message: impl Into<String>, flags: AssignmentFlags) -> Self {
        Self::new(Some(message.into()), flags)
    }

    /// エラーメッセージ
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// フラグ
    pub fn flags(&self) -> AssignmentFlags {
        self.flags
    }

    /// 成功したか
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
