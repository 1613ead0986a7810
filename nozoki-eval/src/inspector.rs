//! インスペクタ
//!
//! locals / watch ビューのルートノードを作ります。

use crate::address::{AddressValue, LocationValue};
use crate::context::{EvaluationContext, StackFrame};
use crate::errors::{check_cancelled, Result};
use crate::expr_eval::{parse_expression, Expression, ExpressionEvaluator, Resolved};
use crate::node::{ImageKind, ValueNode};
use crate::runtime::RuntimeAdapter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// インスペクタ
pub struct Inspector {
    runtime: Arc<dyn RuntimeAdapter>,
}

impl Inspector {
    /// 新しいインスペクタを作成する
    pub fn new(runtime: Arc<dyn RuntimeAdapter>) -> Self {
        Self { runtime }
    }

    /// ランタイムアダプタを取得する
    pub fn runtime(&self) -> &Arc<dyn RuntimeAdapter> {
        &self.runtime
    }

    /// フレームのローカル変数ノードを宣言順に作る
    ///
    /// シャドーイングされた変数もそれぞれのアドレスでノードになる。
    pub fn locals(
        &self,
        _ctx: &EvaluationContext,
        frame: &StackFrame,
        token: &CancellationToken,
    ) -> Result<Vec<ValueNode>> {
        let mut nodes = Vec::with_capacity(frame.locals.len());
        for local in &frame.locals {
            check_cancelled(token)?;

            let location = LocationValue::new(
                self.runtime.clone(),
                local.address,
                local.type_info.clone(),
            );
            let value = location.read(token)?;
            nodes.push(ValueNode::from_resolved(
                self.runtime.clone(),
                local.name.clone(),
                local.name.clone(),
                ImageKind::Local,
                Resolved {
                    address: Some(AddressValue::Location(location)),
                    value,
                    type_info: local.type_info.clone(),
                },
            ));
        }
        Ok(nodes)
    }

    /// 式のノードを作る
    ///
    /// 解析・解決に失敗した場合はエラーノードを返す。
    pub fn watch(
        &self,
        _ctx: &EvaluationContext,
        frame: &StackFrame,
        expression: &str,
        token: &CancellationToken,
    ) -> Result<ValueNode> {
        let expression = expression.trim();
        let parsed = match parse_expression(expression) {
            Ok(parsed) => parsed,
            Err(e) => return Ok(self.error_node(expression, e.to_string())),
        };

        let image = match &parsed {
            Expression::Variable(_) => ImageKind::Local,
            Expression::FieldAccess { .. } => ImageKind::Field,
            Expression::IndexAccess { .. } => ImageKind::ArrayElement,
            Expression::Deref(_) => ImageKind::Dereference,
            Expression::Literal(_) => ImageKind::Literal,
        };

        match ExpressionEvaluator::new(&self.runtime, frame, token).evaluate(&parsed) {
            Ok(resolved) => Ok(ValueNode::from_resolved(
                self.runtime.clone(),
                expression,
                expression,
                image,
                resolved,
            )),
            Err(e) => match e.structured_message() {
                Some(msg) => Ok(self.error_node(expression, msg)),
                None => Err(e),
            },
        }
    }

    /// 評価セッションを終了する
    ///
    /// これまでに作ったノードはすべて無効になる。
    pub fn end_session(&self) -> usize {
        let released = self.runtime.end_session();
        debug!("inspector session ended ({} values released)", released);
        released
    }

    fn error_node(&self, expression: &str, message: String) -> ValueNode {
        ValueNode::error(self.runtime.clone(), expression, expression, message)
    }
}
