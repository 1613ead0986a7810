//! Nozoki 値インスペクションのコア機能
//!
//! このクレートは、停止中のデバッグ対象プロセスのメモリ上にある値（ローカル変数、
//! フィールド、参照先など）を型付きの値として読み書きし、遅延展開されるツリーとして
//! インスペクタ（locals / watch ビュー）に公開する機能を提供します。

pub mod address;
pub mod arena;
pub mod assign;
pub mod context;
pub mod errors;
pub mod expr_eval;
pub mod format;
pub mod inspector;
pub mod node;
pub mod parse;
pub mod runtime;
pub mod types;
pub mod value;

pub use address::{AddressValue, IndirectValue, LocationValue};
pub use arena::{EvaluationResult, ValueArena, ValueHandle};
pub use assign::{AssignmentFlags, AssignmentResult};
pub use context::{EvaluationContext, FrameLocal, InspectConfig, StackFrame};
pub use errors::{EvalError, Result};
pub use expr_eval::{parse_expression, Expression, ExpressionError, ExpressionEvaluator};
pub use format::{Culture, FormatParameters, ValueFormatOptions};
pub use inspector::Inspector;
pub use node::{
    ChildOptions, EvaluationOptions, HasChildren, ImageKind, NodeContent, NodeState, ValueNode,
};
pub use runtime::{RuntimeAdapter, TargetMemory, TargetRuntime};
pub use types::{FieldInfo, TypeInfo};
pub use value::{DisplayValue, Value};

// 呼び出し側がトークンを生成できるように再エクスポート
pub use tokio_util::sync::CancellationToken;
