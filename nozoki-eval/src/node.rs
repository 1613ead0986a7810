//! インスペクションツリーのノード
//!
//! 値（または値の代わりのエラー）を包み、子要素の遅延展開・表示テキストの生成・
//! 代入を提供します。子要素は要求されたインデックスの分だけ作られ、ノードに
//! キャッシュされます。

use crate::address::{AddressValue, IndirectValue, LocationValue};
use crate::arena::EvaluationResult;
use crate::assign::{AssignmentFlags, AssignmentResult};
use crate::context::{EvaluationContext, StackFrame};
use crate::errors::{
    check_cancelled, EvalError, Result, ERR_CANNOT_ASSIGN, ERR_NULL_REFERENCE, ERR_READ_ONLY,
    ERR_SIDE_EFFECTS, ERR_VALUE_UNAVAILABLE,
};
use crate::expr_eval::{parse_expression, Expression, ExpressionEvaluator, Resolved};
use crate::format::{Culture, FormatParameters, ValueFormatOptions, ValueFormatter};
use crate::runtime::RuntimeAdapter;
use crate::types::TypeInfo;
use bitflags::bitflags;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// 子要素を持つか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HasChildren {
    Yes,
    No,
    /// 調べてみないと分からない（ポインタなど）
    Unknown,
}

/// ノードの種類（UIのアイコン選択に使う）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Local,
    Field,
    ArrayElement,
    Dereference,
    Literal,
    Expression,
    Error,
}

/// ノードの中身（エラーと値のどちらか一方）
#[derive(Debug, Clone)]
pub enum NodeContent {
    Error(String),
    Value(EvaluationResult),
}

/// ノードの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// 子要素をまだ調べていない
    Uninspected,
    /// 子要素数を取得済み
    Inspected,
    /// 評価セッションが終了した
    Invalidated,
}

bitflags! {
    /// 子要素取得のオプション
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChildOptions: u32 {
        /// キャッシュを捨てて取り直す
        const REFRESH = 1 << 0;
    }
}

bitflags! {
    /// 代入時の評価オプション
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EvaluationOptions: u32 {
        /// 右辺の型が左辺と完全に一致しなければ失敗する
        const EXACT_TYPE = 1 << 0;
        /// 書き込み後に値を読み直さない
        const NO_REFRESH = 1 << 1;
    }
}

/// インスペクションツリーのノード
#[derive(Clone)]
pub struct ValueNode {
    runtime: Arc<dyn RuntimeAdapter>,
    generation: u64,
    name: String,
    expression: String,
    image: ImageKind,
    type_info: TypeInfo,
    read_only: bool,
    causes_side_effects: bool,
    has_children: HasChildren,
    content: NodeContent,
    address: Option<AddressValue>,
    inspected: bool,
    child_count: Option<u64>,
    children: BTreeMap<u64, ValueNode>,
}

impl ValueNode {
    /// 式の解決結果からノードを作成する
    pub(crate) fn from_resolved(
        runtime: Arc<dyn RuntimeAdapter>,
        name: impl Into<String>,
        expression: impl Into<String>,
        image: ImageKind,
        resolved: Resolved,
    ) -> Self {
        let generation = runtime.generation();
        let read_only = resolved.address.is_none() || resolved.type_info.size() == 0;
        let mut node = Self {
            runtime,
            generation,
            name: name.into(),
            expression: expression.into(),
            image,
            type_info: resolved.type_info,
            read_only,
            causes_side_effects: false,
            has_children: HasChildren::No,
            content: NodeContent::Error(String::new()),
            address: resolved.address,
            inspected: false,
            child_count: None,
            children: BTreeMap::new(),
        };
        node.set_value(resolved.value);
        node
    }

    /// 値の代わりにエラーを持つノードを作成する
    pub fn error(
        runtime: Arc<dyn RuntimeAdapter>,
        name: impl Into<String>,
        expression: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let generation = runtime.generation();
        Self {
            runtime,
            generation,
            name: name.into(),
            expression: expression.into(),
            image: ImageKind::Error,
            type_info: TypeInfo::Unknown,
            read_only: true,
            causes_side_effects: false,
            has_children: HasChildren::No,
            content: NodeContent::Error(message.into()),
            address: None,
            inspected: false,
            child_count: None,
            children: BTreeMap::new(),
        }
    }

    /// 副作用の有無を設定する
    pub fn with_side_effects(mut self, causes_side_effects: bool) -> Self {
        self.causes_side_effects = causes_side_effects;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn image(&self) -> ImageKind {
        self.image
    }

    pub fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn causes_side_effects(&self) -> bool {
        self.causes_side_effects
    }

    pub fn has_children(&self) -> HasChildren {
        self.has_children
    }

    pub fn content(&self) -> &NodeContent {
        &self.content
    }

    /// エラーメッセージ（値を持つノードは `None`）
    pub fn error_message(&self) -> Option<&str> {
        match &self.content {
            NodeContent::Error(msg) => Some(msg),
            NodeContent::Value(_) => None,
        }
    }

    /// 値（エラーノードは `None`）
    pub fn value(&self) -> Option<&EvaluationResult> {
        match &self.content {
            NodeContent::Value(v) => Some(v),
            NodeContent::Error(_) => None,
        }
    }

    /// 書き込み先
    pub fn address(&self) -> Option<&AddressValue> {
        self.address.as_ref()
    }

    /// 現在の状態
    pub fn state(&self) -> NodeState {
        if self.runtime.generation() != self.generation {
            NodeState::Invalidated
        } else if self.inspected {
            NodeState::Inspected
        } else {
            NodeState::Uninspected
        }
    }

    /// 子要素の数を取得する
    ///
    /// `has_children` が `No` のノードはアダプタに一切触れずに0を返す。
    pub fn get_child_count(
        &mut self,
        _ctx: &EvaluationContext,
        _frame: &StackFrame,
        token: &CancellationToken,
    ) -> Result<u64> {
        if self.has_children == HasChildren::No {
            return Ok(0);
        }
        self.ensure_valid()?;
        check_cancelled(token)?;

        if let Some(count) = self.child_count {
            return Ok(count);
        }

        let count = self.count_children(token)?;
        trace!("{}: {} children", self.expression, count);
        self.child_count = Some(count);
        self.inspected = true;
        Ok(count)
    }

    /// 子要素を取得する
    ///
    /// `index` から最大 `count` 個を宣言順（配列は添字順）で返す。末尾で切り詰め、
    /// `index` が子要素数以上なら空を返す。
    ///
    /// 返すのはキャッシュした子要素の複製。返された子要素に代入しても親のキャッシュは
    /// 古いままなので、読み直すには `ChildOptions::REFRESH` を渡す。
    pub fn get_children(
        &mut self,
        ctx: &EvaluationContext,
        frame: &StackFrame,
        index: u64,
        count: usize,
        options: ChildOptions,
        token: &CancellationToken,
    ) -> Result<Vec<ValueNode>> {
        if self.has_children == HasChildren::No {
            return Ok(Vec::new());
        }
        self.ensure_valid()?;
        check_cancelled(token)?;

        if options.contains(ChildOptions::REFRESH) {
            self.child_count = None;
            self.children.clear();
        }

        let total = self.get_child_count(ctx, frame, token)?;
        if index >= total {
            return Ok(Vec::new());
        }

        let end = index.saturating_add(count as u64).min(total);
        let mut children = Vec::new();
        for i in index..end {
            check_cancelled(token)?;
            if let Some(child) = self.children.get(&i) {
                children.push(child.clone());
                continue;
            }
            let child = self.make_child(i, token)?;
            self.children.insert(i, child.clone());
            children.push(child);
        }
        Ok(children)
    }

    /// 要求された表示フィールドを書き込む
    ///
    /// ノードの値やエラーは変更しない。
    pub fn format(
        &self,
        ctx: &EvaluationContext,
        _frame: &StackFrame,
        params: &mut FormatParameters<'_>,
        culture: Option<&Culture>,
        token: &CancellationToken,
    ) -> Result<()> {
        if let Some(out) = params.name.as_mut() {
            out.push_str(&self.name);
        }
        if let Some(out) = params.type_name.as_mut() {
            out.push_str(&self.type_info.name());
        }

        let Some(out) = params.value.as_mut() else {
            return Ok(());
        };
        match &self.content {
            NodeContent::Error(msg) => out.push_str(msg),
            NodeContent::Value(_)
                if self.causes_side_effects
                    && !params.options.contains(ValueFormatOptions::ALLOW_SIDE_EFFECTS) =>
            {
                out.push_str(ERR_SIDE_EFFECTS)
            }
            NodeContent::Value(value) => {
                self.ensure_valid()?;
                let invariant = Culture::invariant();
                let formatter = ValueFormatter::new(
                    self.runtime.as_ref(),
                    &ctx.config,
                    params.options,
                    culture.unwrap_or(&invariant),
                );
                out.push_str(&formatter.format(value.value(), token)?);
            }
        }
        Ok(())
    }

    /// 式を評価してノードの格納場所に代入する
    ///
    /// 解析エラーや型の不一致などは `AssignmentResult` のエラーとして返す。
    /// キャンセル・アダプタの障害・無効化のみ `Err` になる。
    pub fn assign(
        &mut self,
        _ctx: &EvaluationContext,
        frame: &StackFrame,
        expression: &str,
        options: EvaluationOptions,
        token: &CancellationToken,
    ) -> Result<AssignmentResult> {
        self.ensure_valid()?;
        check_cancelled(token)?;

        if matches!(self.content, NodeContent::Error(_)) {
            return Ok(AssignmentResult::error(ERR_CANNOT_ASSIGN, AssignmentFlags::empty()));
        }
        let Some(address) = self.address.clone().filter(|_| !self.read_only) else {
            return Ok(AssignmentResult::error(ERR_READ_ONLY, AssignmentFlags::empty()));
        };

        let expr = match parse_expression(expression) {
            Ok(expr) => expr,
            Err(e) => {
                return Ok(AssignmentResult::error(
                    e.to_string(),
                    AssignmentFlags::COMPILER_ERROR,
                ))
            }
        };

        let evaluator = ExpressionEvaluator::new(&self.runtime, frame, token);
        let rhs = match evaluator.evaluate(&expr) {
            Ok(resolved) => resolved,
            Err(e) => return structured_failure(e),
        };
        let Some(rhs) = rhs.value else {
            return Ok(AssignmentResult::error(ERR_VALUE_UNAVAILABLE, AssignmentFlags::empty()));
        };
        let rhs = rhs.into_value();

        let target_type = address.type_info();
        let mismatch = rhs.type_info() != target_type;
        if mismatch && options.contains(EvaluationOptions::EXACT_TYPE) {
            return Ok(AssignmentResult::error(
                format!(
                    "Type mismatch: expected '{}', found '{}'",
                    target_type.name(),
                    rhs.type_info().name()
                ),
                AssignmentFlags::empty(),
            ));
        }
        let written = rhs.convert_to(target_type).ok();
        // リテラルは代入先の型を取るので型の変更とはみなさない
        let type_changed = mismatch && !matches!(expr, Expression::Literal(_));

        if let Err(e) = address.write(&rhs, token) {
            return structured_failure(e);
        }
        debug!("assigned '{}' to {}", expression, self.expression);

        let mut flags = AssignmentFlags::empty();
        if type_changed {
            flags |= AssignmentFlags::TYPE_CHANGED;
        }
        let old = self.value().map(|v| v.value().bytes());
        if written.as_deref() != old {
            flags |= AssignmentFlags::VALUE_CHANGED;
        }

        if !options.contains(EvaluationOptions::NO_REFRESH) {
            // 書き込みは済んでいるので、読み直しはキャンセルせず失敗も結果に含めない
            match address.read(&CancellationToken::new()) {
                Ok(new_value) => self.set_value(new_value),
                Err(e) => {
                    warn!("{}: re-read after assignment failed: {}", self.expression, e);
                    self.set_value(None);
                }
            }
        }

        Ok(AssignmentResult::success(flags))
    }

    /// 評価セッションが続いているか確認する
    fn ensure_valid(&self) -> Result<()> {
        if self.runtime.generation() != self.generation {
            return Err(EvalError::Invalidated);
        }
        Ok(())
    }

    /// 値を差し替え、子要素のキャッシュを捨てる
    fn set_value(&mut self, value: Option<EvaluationResult>) {
        self.has_children = match &value {
            Some(v) => children_hint(v),
            None => HasChildren::No,
        };
        self.content = match value {
            Some(v) => NodeContent::Value(v),
            None => NodeContent::Error(ERR_VALUE_UNAVAILABLE.to_string()),
        };
        self.child_count = None;
        self.children.clear();
        self.inspected = false;
    }

    /// 子要素の数を数える
    fn count_children(&self, token: &CancellationToken) -> Result<u64> {
        let Some(value) = self.value() else {
            return Ok(0);
        };
        let value = value.value();

        match value.type_info() {
            TypeInfo::Struct { fields, .. } => Ok(fields.len() as u64),
            TypeInfo::Array {
                length: Some(length),
                ..
            } => Ok(*length),
            TypeInfo::Reference { .. } => Ok(1),
            TypeInfo::Pointer { .. } => {
                // 参照先が読めるかどうかで判定する
                let readable = self.runtime.load_indirect(value, token)?.is_some();
                Ok(readable as u64)
            }
            _ => Ok(0),
        }
    }

    /// `index` 番目の子要素を作る
    fn make_child(&self, index: u64, token: &CancellationToken) -> Result<ValueNode> {
        let Some(parent) = self.value() else {
            return Err(EvalError::Evaluation(ERR_VALUE_UNAVAILABLE.to_string()));
        };
        let parent = parent.value();

        let (name, expression, image, offset, type_info) = match parent.type_info() {
            TypeInfo::Struct { fields, .. } => {
                let field = fields
                    .get(index as usize)
                    .ok_or_else(|| EvalError::Evaluation(ERR_VALUE_UNAVAILABLE.to_string()))?;
                (
                    field.name.clone(),
                    format!("{}.{}", self.expression, field.name),
                    ImageKind::Field,
                    field.offset,
                    field.type_info.clone(),
                )
            }
            TypeInfo::Array {
                element_type: Some(element_type),
                ..
            } => {
                let offset = index
                    .checked_mul(element_type.size())
                    .ok_or_else(|| EvalError::Evaluation(ERR_VALUE_UNAVAILABLE.to_string()))?;
                (
                    format!("[{}]", index),
                    format!("{}[{}]", self.expression, index),
                    ImageKind::ArrayElement,
                    offset,
                    (**element_type).clone(),
                )
            }
            TypeInfo::Pointer { .. } | TypeInfo::Reference { .. } => {
                return self.make_deref_child(token);
            }
            _ => return Err(EvalError::Evaluation(ERR_VALUE_UNAVAILABLE.to_string())),
        };

        let address = self.child_address(parent.address(), offset, &type_info);
        let value = parent
            .slice(offset, &type_info)
            .map(|v| self.runtime.record_value(v));

        let mut child = ValueNode::from_resolved(
            self.runtime.clone(),
            name,
            expression,
            image,
            Resolved {
                address,
                value,
                type_info,
            },
        );
        child.read_only |= self.read_only;
        child.causes_side_effects = self.causes_side_effects;
        Ok(child)
    }

    /// 参照・ポインタを1段辿った子要素を作る
    fn make_deref_child(&self, token: &CancellationToken) -> Result<ValueNode> {
        let name = format!("*{}", self.name);
        let expression = format!("*{}", self.expression);

        let Some(cell) = self.value() else {
            return Ok(self.error_child(name, expression, ERR_VALUE_UNAVAILABLE));
        };
        let cell = cell.value().clone();
        if cell.target_address() == Some(0) {
            return Ok(self.error_child(name, expression, ERR_NULL_REFERENCE));
        }
        let Some(indirect) = IndirectValue::new(self.runtime.clone(), cell) else {
            return Ok(self.error_child(name, expression, ERR_VALUE_UNAVAILABLE));
        };

        let value = indirect.read(token)?;
        let mut child = ValueNode::from_resolved(
            self.runtime.clone(),
            name,
            expression,
            ImageKind::Dereference,
            Resolved {
                type_info: indirect.type_info().clone(),
                address: Some(AddressValue::Indirect(indirect)),
                value,
            },
        );
        child.causes_side_effects = self.causes_side_effects;
        Ok(child)
    }

    fn error_child(&self, name: String, expression: String, message: &str) -> ValueNode {
        ValueNode::error(self.runtime.clone(), name, expression, message)
    }

    /// フィールド・配列要素の書き込み先
    fn child_address(
        &self,
        parent_address: Option<u64>,
        offset: u64,
        type_info: &TypeInfo,
    ) -> Option<AddressValue> {
        // 書き込み先を持たない親（リテラルなど）の子も書き込めない
        let base = match self.address.as_ref()? {
            AddressValue::Location(loc) => loc.address(),
            AddressValue::Indirect(_) => parent_address?,
        };
        Some(AddressValue::Location(LocationValue::new(
            self.runtime.clone(),
            base.wrapping_add(offset),
            type_info.clone(),
        )))
    }
}

/// 値の型から子要素の有無を判定する
fn children_hint(value: &EvaluationResult) -> HasChildren {
    let value = value.value();
    match value.type_info() {
        TypeInfo::Struct { fields, .. } if !fields.is_empty() => HasChildren::Yes,
        TypeInfo::Array {
            element_type: Some(_),
            length: Some(length),
        } if *length > 0 => HasChildren::Yes,
        TypeInfo::Reference {
            referent_type: Some(_),
            ..
        } => match value.target_address() {
            Some(0) | None => HasChildren::No,
            Some(_) => HasChildren::Yes,
        },
        TypeInfo::Pointer {
            pointee_type: Some(_),
            ..
        } => match value.target_address() {
            Some(0) | None => HasChildren::No,
            Some(_) => HasChildren::Unknown,
        },
        _ => HasChildren::No,
    }
}

/// 構造化された失敗を代入結果に変換する
fn structured_failure(err: EvalError) -> Result<AssignmentResult> {
    let flags = match err {
        EvalError::Expression(_) => AssignmentFlags::COMPILER_ERROR,
        _ => AssignmentFlags::empty(),
    };
    match err.structured_message() {
        Some(msg) => Ok(AssignmentResult::error(msg, flags)),
        None => Err(err),
    }
}

impl fmt::Debug for ValueNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueNode")
            .field("name", &self.name)
            .field("expression", &self.expression)
            .field("image", &self.image)
            .field("type_info", &self.type_info.name())
            .field("read_only", &self.read_only)
            .field("has_children", &self.has_children)
            .field("content", &self.content)
            .field("cached_children", &self.children.len())
            .finish()
    }
}
