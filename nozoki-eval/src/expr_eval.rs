//! 式評価エンジン
//!
//! watch式のルート解決と、代入の右辺の評価に使う最小限の式を扱います。
//! デバッグ対象のコードは実行しないため、ここで評価できる式は副作用を持ちません。

use crate::address::{AddressValue, IndirectValue, LocationValue};
use crate::arena::EvaluationResult;
use crate::context::StackFrame;
use crate::errors::Result;
use crate::runtime::RuntimeAdapter;
use crate::types::TypeInfo;
use crate::value::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 式の抽象構文木
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// 変数名: `x`
    Variable(String),
    /// フィールドアクセス: `obj.field`
    FieldAccess {
        base: Box<Expression>,
        field: String,
    },
    /// 配列インデックスアクセス: `arr[0]`
    IndexAccess {
        base: Box<Expression>,
        index: u64,
    },
    /// 間接参照: `*ptr`
    Deref(Box<Expression>),
    /// リテラル: `42`, `-1.5`, `true`
    Literal(Literal),
}

/// リテラル
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// 式の解析・解決エラー
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Variable '{0}' not found")]
    VariableNotFound(String),

    #[error("Field '{field}' not found in '{type_name}'")]
    FieldNotFound { type_name: String, field: String },

    #[error("Cannot access field of non-struct type '{0}'")]
    NotAStruct(String),

    #[error("Cannot index non-array type '{0}'")]
    NotAnArray(String),

    #[error("Index {index} out of bounds (length: {length})")]
    IndexOutOfBounds { index: u64, length: u64 },

    #[error("Cannot dereference non-pointer type '{0}'")]
    NotAPointer(String),

    #[error("Null reference")]
    NullReference,

    #[error("Value of type '{0}' is not available")]
    Unavailable(String),
}

/// 式の解決結果
#[derive(Debug, Clone)]
pub struct Resolved {
    /// 書き込み先（リテラルなどは `None`）
    pub address: Option<AddressValue>,
    /// 読み取った値（読み取れなかった場合は `None`）
    pub value: Option<EvaluationResult>,
    /// 静的な型
    pub type_info: TypeInfo,
}

impl Resolved {
    /// 値が置かれているアドレス
    fn location(&self) -> Option<u64> {
        match &self.address {
            Some(AddressValue::Location(loc)) => Some(loc.address()),
            _ => self.value.as_ref().and_then(|v| v.value().address()),
        }
    }
}

/// 式評価器
pub struct ExpressionEvaluator<'a> {
    runtime: &'a Arc<dyn RuntimeAdapter>,
    frame: &'a StackFrame,
    token: &'a CancellationToken,
}

impl<'a> ExpressionEvaluator<'a> {
    /// 新しい式評価器を作成する
    pub fn new(
        runtime: &'a Arc<dyn RuntimeAdapter>,
        frame: &'a StackFrame,
        token: &'a CancellationToken,
    ) -> Self {
        Self {
            runtime,
            frame,
            token,
        }
    }

    /// 式を評価する
    pub fn evaluate(&self, expr: &Expression) -> Result<Resolved> {
        match expr {
            Expression::Variable(name) => self.eval_variable(name),
            Expression::FieldAccess { base, field } => self.eval_field_access(base, field),
            Expression::IndexAccess { base, index } => self.eval_index_access(base, *index),
            Expression::Deref(inner) => {
                let base = self.evaluate(inner)?;
                self.eval_deref(base)
            }
            Expression::Literal(lit) => Ok(self.eval_literal(lit)),
        }
    }

    /// 変数を評価する
    fn eval_variable(&self, name: &str) -> Result<Resolved> {
        let local = self
            .frame
            .find_local(name)
            .ok_or_else(|| ExpressionError::VariableNotFound(name.to_string()))?;

        let location =
            LocationValue::new(self.runtime.clone(), local.address, local.type_info.clone());
        let value = location.read(self.token)?;

        Ok(Resolved {
            address: Some(AddressValue::Location(location)),
            value,
            type_info: local.type_info.clone(),
        })
    }

    /// フィールドアクセスを評価する
    fn eval_field_access(&self, base: &Expression, field: &str) -> Result<Resolved> {
        let mut base = self.evaluate(base)?;

        // 参照は自動的に1段辿る
        if matches!(base.type_info, TypeInfo::Reference { .. }) {
            base = self.eval_deref(base)?;
        }

        let TypeInfo::Struct { name, fields, .. } = &base.type_info else {
            return Err(ExpressionError::NotAStruct(base.type_info.name()).into());
        };

        let field_info = fields
            .iter()
            .find(|f| f.name == field)
            .ok_or_else(|| ExpressionError::FieldNotFound {
                type_name: name.clone(),
                field: field.to_string(),
            })?;

        Ok(self.sub_value(&base, field_info.offset, &field_info.type_info))
    }

    /// 配列インデックスアクセスを評価する
    fn eval_index_access(&self, base: &Expression, index: u64) -> Result<Resolved> {
        let base = self.evaluate(base)?;

        let TypeInfo::Array {
            element_type: Some(element_type),
            length: Some(length),
        } = &base.type_info
        else {
            return Err(ExpressionError::NotAnArray(base.type_info.name()).into());
        };

        if index >= *length {
            return Err(ExpressionError::IndexOutOfBounds {
                index,
                length: *length,
            }
            .into());
        }

        let offset = index
            .checked_mul(element_type.size())
            .ok_or_else(|| ExpressionError::Unavailable(element_type.name()))?;
        Ok(self.sub_value(&base, offset, element_type))
    }

    /// 間接参照を評価する
    fn eval_deref(&self, base: Resolved) -> Result<Resolved> {
        if !base.type_info.is_indirection() {
            return Err(ExpressionError::NotAPointer(base.type_info.name()).into());
        }

        let cell = base
            .value
            .ok_or_else(|| ExpressionError::Unavailable(base.type_info.name()))?
            .into_value();
        let null = cell.target_address() == Some(0);

        let indirect = IndirectValue::new(self.runtime.clone(), cell)
            .ok_or_else(|| ExpressionError::Unavailable(base.type_info.name()))?;
        if null {
            return Err(ExpressionError::NullReference.into());
        }

        let value = indirect.read(self.token)?;
        Ok(Resolved {
            type_info: indirect.type_info().clone(),
            value,
            address: Some(AddressValue::Indirect(indirect)),
        })
    }

    /// リテラルを評価する
    fn eval_literal(&self, lit: &Literal) -> Resolved {
        let value = match lit {
            Literal::Int(v) => Value::from_i64(*v),
            Literal::Float(v) => Value::from_f64(*v),
            Literal::Bool(v) => Value::from_bool(*v),
        };
        let type_info = value.type_info().clone();
        Resolved {
            address: None,
            value: Some(self.runtime.record_value(value)),
            type_info,
        }
    }

    /// フィールド・配列要素を切り出す
    ///
    /// 親の値はすでに読み取り済みなので、デバッグ対象への再読み込みはしない。
    fn sub_value(&self, base: &Resolved, offset: u64, type_info: &TypeInfo) -> Resolved {
        let address = base.location().map(|addr| {
            AddressValue::Location(LocationValue::new(
                self.runtime.clone(),
                addr.wrapping_add(offset),
                type_info.clone(),
            ))
        });
        let value = base
            .value
            .as_ref()
            .and_then(|v| v.value().slice(offset, type_info))
            .map(|v| self.runtime.record_value(v));

        Resolved {
            address,
            value,
            type_info: type_info.clone(),
        }
    }
}

/// 式をパースする
pub fn parse_expression(input: &str) -> std::result::Result<Expression, ExpressionError> {
    let mut parser = Parser { input, pos: 0 };
    let expr = parser.parse_expr()?;
    parser.skip_whitespace();
    if let Some(c) = parser.peek() {
        return Err(ExpressionError::Syntax(format!(
            "unexpected '{}' at offset {}",
            c, parser.pos
        )));
    }
    Ok(expr)
}

/// 再帰下降パーサー
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn syntax<T>(&self, message: &str) -> std::result::Result<T, ExpressionError> {
        Err(ExpressionError::Syntax(format!(
            "{} at offset {}",
            message, self.pos
        )))
    }

    /// expr := '*' expr | postfix
    fn parse_expr(&mut self) -> std::result::Result<Expression, ExpressionError> {
        if self.eat('*') {
            return Ok(Expression::Deref(Box::new(self.parse_expr()?)));
        }
        self.parse_postfix()
    }

    /// postfix := primary ('.' field | '[' index ']')*
    fn parse_postfix(&mut self) -> std::result::Result<Expression, ExpressionError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat('.') {
                self.skip_whitespace();
                let field = self.take_while(|c| c.is_alphanumeric() || c == '_');
                if field.is_empty() {
                    return self.syntax("expected field name");
                }
                expr = Expression::FieldAccess {
                    base: Box::new(expr),
                    field,
                };
            } else if self.eat('[') {
                self.skip_whitespace();
                let index = self.parse_index()?;
                if !self.eat(']') {
                    return self.syntax("missing closing bracket ']'");
                }
                expr = Expression::IndexAccess {
                    base: Box::new(expr),
                    index,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// primary := '(' expr ')' | literal | identifier
    fn parse_primary(&mut self) -> std::result::Result<Expression, ExpressionError> {
        self.skip_whitespace();
        match self.peek() {
            Some('(') => {
                self.bump();
                let expr = self.parse_expr()?;
                if !self.eat(')') {
                    return self.syntax("missing closing parenthesis ')'");
                }
                Ok(expr)
            }
            Some(c) if c == '-' || c.is_ascii_digit() => self.parse_number(),
            Some(c) if c.is_alphabetic() || c == '_' => {
                let ident = self.take_while(|c| c.is_alphanumeric() || c == '_');
                Ok(match ident.as_str() {
                    "true" => Expression::Literal(Literal::Bool(true)),
                    "false" => Expression::Literal(Literal::Bool(false)),
                    _ => Expression::Variable(ident),
                })
            }
            Some(_) => self.syntax("unexpected character"),
            None => self.syntax("unexpected end of expression"),
        }
    }

    fn parse_number(&mut self) -> std::result::Result<Expression, ExpressionError> {
        let negative = self.peek() == Some('-');
        if negative {
            self.bump();
        }

        let text = self.take_while(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_');
        let digits = text.replace('_', "");

        let magnitude = if let Some(hex) = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
        {
            i128::from_str_radix(hex, 16).ok()
        } else if digits.contains('.') {
            return match digits.parse::<f64>() {
                Ok(v) => Ok(Expression::Literal(Literal::Float(if negative { -v } else { v }))),
                Err(_) => self.syntax(&format!("invalid number '{}'", text)),
            };
        } else {
            digits.parse::<i128>().ok()
        };

        let value = magnitude
            .map(|m| if negative { -m } else { m })
            .and_then(|v| i64::try_from(v).ok());
        match value {
            Some(v) => Ok(Expression::Literal(Literal::Int(v))),
            None => self.syntax(&format!("invalid integer literal '{}'", text)),
        }
    }

    fn parse_index(&mut self) -> std::result::Result<u64, ExpressionError> {
        let text = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
        let parsed = match text.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => text.parse::<u64>(),
        };
        parsed.or_else(|_| self.syntax(&format!("invalid array index '{}'", text)))
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
        self.input[start..self.pos].to_string()
    }
}
