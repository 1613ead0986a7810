//! 値のフォーマット
//!
//! 型情報に基づいて値を人間が読みやすい形式でフォーマットします。
//! 参照は1段ずつランタイムアダプタ経由で辿ります。

use crate::context::InspectConfig;
use crate::errors::{check_cancelled, Result};
use crate::runtime::RuntimeAdapter;
use crate::types::{FieldInfo, TypeInfo};
use crate::value::{DisplayValue, Value};
use bitflags::bitflags;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

bitflags! {
    /// 値の表示オプション
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ValueFormatOptions: u32 {
        /// 整数を16進数で表示する
        const HEX = 1 << 0;
        /// 桁区切りを入れる
        const DIGIT_SEPARATORS = 1 << 1;
        /// 副作用のある式の評価を許可する
        const ALLOW_SIDE_EFFECTS = 1 << 2;
    }
}

/// 数値表示の地域設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Culture {
    pub name: String,
    pub digit_group_separator: char,
    pub decimal_separator: char,
}

impl Culture {
    /// 地域設定を作成する
    pub fn new(name: impl Into<String>, digit_group_separator: char, decimal_separator: char) -> Self {
        Self {
            name: name.into(),
            digit_group_separator,
            decimal_separator,
        }
    }

    /// 地域に依存しない既定の設定
    pub fn invariant() -> Self {
        Self::new("", ',', '.')
    }
}

impl Default for Culture {
    fn default() -> Self {
        Self::invariant()
    }
}

/// 表示フィールドの出力先
///
/// `Some` のフィールドにだけ書き込みます。書き込みは既存の内容への追記です。
#[derive(Debug, Default)]
pub struct FormatParameters<'a> {
    pub name: Option<&'a mut String>,
    pub value: Option<&'a mut String>,
    pub type_name: Option<&'a mut String>,
    pub options: ValueFormatOptions,
}

impl<'a> FormatParameters<'a> {
    /// オプションを指定して作成する（出力先なし）
    pub fn new(options: ValueFormatOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    /// 名前の出力先を設定する
    pub fn with_name(mut self, out: &'a mut String) -> Self {
        self.name = Some(out);
        self
    }

    /// 値の出力先を設定する
    pub fn with_value(mut self, out: &'a mut String) -> Self {
        self.value = Some(out);
        self
    }

    /// 型名の出力先を設定する
    pub fn with_type(mut self, out: &'a mut String) -> Self {
        self.type_name = Some(out);
        self
    }
}

/// 値フォーマッター
pub struct ValueFormatter<'a> {
    runtime: &'a dyn RuntimeAdapter,
    config: &'a InspectConfig,
    options: ValueFormatOptions,
    culture: &'a Culture,
}

impl<'a> ValueFormatter<'a> {
    /// 新しいフォーマッターを作成する
    pub fn new(
        runtime: &'a dyn RuntimeAdapter,
        config: &'a InspectConfig,
        options: ValueFormatOptions,
        culture: &'a Culture,
    ) -> Self {
        Self {
            runtime,
            config,
            options,
            culture,
        }
    }

    /// 値をフォーマットする
    pub fn format(&self, value: &Value, token: &CancellationToken) -> Result<String> {
        let mut visited = HashSet::new();
        self.format_value(value, 0, &mut visited, token)
    }

    fn format_value(
        &self,
        value: &Value,
        depth: usize,
        visited: &mut HashSet<u64>,
        token: &CancellationToken,
    ) -> Result<String> {
        check_cancelled(token)?;

        if depth > self.config.max_depth {
            return Ok("<max depth reached>".to_string());
        }

        match value.type_info() {
            TypeInfo::Primitive { .. } => Ok(self.format_primitive(value)),
            TypeInfo::Pointer { .. } => Ok(match value.target_address() {
                Some(0) => "null".to_string(),
                Some(addr) => format!("0x{:x}", addr),
                None => "<unavailable>".to_string(),
            }),
            TypeInfo::Reference { .. } => self.format_reference(value, depth, visited, token),
            TypeInfo::Struct { name, fields, .. } => {
                self.format_struct(value, name, fields, depth, visited, token)
            }
            TypeInfo::Array {
                element_type: Some(element_type),
                length: Some(length),
            } => self.format_array(value, element_type, *length, depth, visited, token),
            TypeInfo::Array { .. } => Ok("[<unknown array>]".to_string()),
            TypeInfo::Unknown => Ok("<unknown type>".to_string()),
        }
    }

    /// 参照先をフォーマットする
    fn format_reference(
        &self,
        value: &Value,
        depth: usize,
        visited: &mut HashSet<u64>,
        token: &CancellationToken,
    ) -> Result<String> {
        let target = match value.target_address() {
            Some(0) => return Ok("null".to_string()),
            Some(addr) => addr,
            None => return Ok("<unavailable>".to_string()),
        };

        // 循環参照チェック
        if !visited.insert(target) {
            return Ok("<circular reference>".to_string());
        }

        let formatted = match self.runtime.load_indirect(value, token)? {
            Some(referent) => self.format_value(&referent, depth + 1, visited, token)?,
            None => format!("&0x{:x}", target),
        };
        visited.remove(&target);
        Ok(formatted)
    }

    /// 構造体をフォーマットする
    fn format_struct(
        &self,
        value: &Value,
        name: &str,
        fields: &[FieldInfo],
        depth: usize,
        visited: &mut HashSet<u64>,
        token: &CancellationToken,
    ) -> Result<String> {
        if fields.is_empty() {
            return Ok(format!("{} {{}}", name));
        }
        if depth == self.config.max_depth {
            return Ok(format!("{} {{ ... }}", name));
        }

        let mut parts = Vec::with_capacity(fields.len());
        for field in fields {
            let text = match value.slice(field.offset, &field.type_info) {
                Some(field_value) => self.format_value(&field_value, depth + 1, visited, token)?,
                None => "<unavailable>".to_string(),
            };
            parts.push(format!("{}: {}", field.name, text));
        }

        Ok(format!("{} {{ {} }}", name, parts.join(", ")))
    }

    /// 配列をフォーマットする
    fn format_array(
        &self,
        value: &Value,
        element_type: &TypeInfo,
        length: u64,
        depth: usize,
        visited: &mut HashSet<u64>,
        token: &CancellationToken,
    ) -> Result<String> {
        if length == 0 {
            return Ok("[]".to_string());
        }
        if depth == self.config.max_depth {
            return Ok("[...]".to_string());
        }

        let shown = length.min(self.config.max_array_elements as u64);
        let element_size = element_type.size();
        let mut parts = Vec::with_capacity(shown as usize + 1);
        for i in 0..shown {
            let text = match value.slice(i * element_size, element_type) {
                Some(element) => self.format_value(&element, depth + 1, visited, token)?,
                None => "<unavailable>".to_string(),
            };
            parts.push(text);
        }
        if shown < length {
            parts.push("...".to_string());
        }

        Ok(format!("[{}]", parts.join(", ")))
    }

    /// 基本型をフォーマットする
    fn format_primitive(&self, value: &Value) -> String {
        let size = value.type_info().size();
        match value.decode() {
            DisplayValue::Int(v) if self.options.contains(ValueFormatOptions::HEX) => {
                // 型の幅の2の補数で表示する
                let mask = if size >= 8 {
                    u64::MAX
                } else {
                    (1u64 << (size * 8)) - 1
                };
                self.format_hex(v as u64 & mask)
            }
            DisplayValue::Uint(v) if self.options.contains(ValueFormatOptions::HEX) => {
                self.format_hex(v)
            }
            DisplayValue::Int(v) => {
                let digits = self.group_decimal(&v.unsigned_abs().to_string());
                if v < 0 {
                    format!("-{}", digits)
                } else {
                    digits
                }
            }
            DisplayValue::Uint(v) => self.group_decimal(&v.to_string()),
            DisplayValue::Float(v) => self.format_float(v),
            DisplayValue::Char(c) => format!("{:?}", c),
            DisplayValue::Unavailable => "<unavailable>".to_string(),
            other => other.to_string(),
        }
    }

    fn format_float(&self, v: f64) -> String {
        if !v.is_finite() {
            return v.to_string();
        }
        let text = v.to_string();
        let (int_part, frac_part) = match text.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (text.as_str(), None),
        };
        let (sign, int_digits) = match int_part.strip_prefix('-') {
            Some(d) => ("-", d),
            None => ("", int_part),
        };

        let mut out = format!("{}{}", sign, self.group_decimal(int_digits));
        if let Some(frac) = frac_part {
            out.push(self.culture.decimal_separator);
            out.push_str(frac);
        }
        out
    }

    fn format_hex(&self, v: u64) -> String {
        let digits = format!("{:x}", v);
        if self.options.contains(ValueFormatOptions::DIGIT_SEPARATORS) {
            format!("0x{}", group_digits(&digits, 4, '_'))
        } else {
            format!("0x{}", digits)
        }
    }

    fn group_decimal(&self, digits: &str) -> String {
        if self.options.contains(ValueFormatOptions::DIGIT_SEPARATORS) {
            group_digits(digits, 3, self.culture.digit_group_separator)
        } else {
            digits.to_string()
        }
    }
}

/// 数字列を右から `width` 桁ごとに区切る
fn group_digits(digits: &str, width: usize, separator: char) -> String {
    let len = digits.chars().count();
    let mut out = String::with_capacity(len + len / width);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % width == 0 {
            out.push(separator);
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{EvaluationResult, ValueArena, ValueHandle};
    use std::sync::Mutex;

    /// 参照を辿らないテスト用アダプタ
    struct NoMemory {
        arena: Mutex<ValueArena>,
    }

    impl RuntimeAdapter for NoMemory {
        fn load_indirect(&self, _: &Value, _: &CancellationToken) -> Result<Option<Value>> {
            Ok(None)
        }
        fn store_indirect(&self, _: &Value, _: &Value, _: &CancellationToken) -> Result<()> {
            Ok(())
        }
        fn load(&self, _: u64, _: &TypeInfo, _: &CancellationToken) -> Result<Option<Value>> {
            Ok(None)
        }
        fn store(&self, _: u64, _: &TypeInfo, _: &Value, _: &CancellationToken) -> Result<()> {
            Ok(())
        }
        fn record_value(&self, value: Value) -> EvaluationResult {
            self.arena.lock().unwrap().record(value)
        }
        fn resolve(&self, handle: ValueHandle) -> Option<Value> {
            self.arena.lock().unwrap().get(handle).cloned()
        }
        fn values_equal(&self, _: &Value, _: &Value) -> bool {
            false
        }
        fn generation(&self) -> u64 {
            0
        }
        fn end_session(&self) -> usize {
            0
        }
    }

    fn format_with(value: &Value, options: ValueFormatOptions, culture: &Culture) -> String {
        let runtime = NoMemory {
            arena: Mutex::new(ValueArena::new()),
        };
        let config = InspectConfig {
            max_array_elements: 3,
            ..Default::default()
        };
        ValueFormatter::new(&runtime, &config, options, culture)
            .format(value, &CancellationToken::new())
            .unwrap()
    }

    fn primitive(name: &str, bytes: &[u8]) -> Value {
        Value::new(TypeInfo::primitive(name).unwrap(), None, bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_group_digits() {
        assert_eq!(group_digits("1234567", 3, ','), "1,234,567");
        assert_eq!(group_digits("123", 3, ','), "123");
        assert_eq!(group_digits("deadbeef", 4, '_'), "dead_beef");
    }

    #[test]
    fn test_format_integers() {
        let invariant = Culture::invariant();
        let v = primitive("i32", &(-1234567i32).to_le_bytes());

        assert_eq!(format_with(&v, ValueFormatOptions::empty(), &invariant), "-1234567");
        assert_eq!(
            format_with(&v, ValueFormatOptions::DIGIT_SEPARATORS, &invariant),
            "-1,234,567"
        );
        assert_eq!(format_with(&v, ValueFormatOptions::HEX, &invariant), "0xffed2979");

        let german = Culture::new("de-DE", '.', ',');
        let f = primitive("f64", &1234.5f64.to_le_bytes());
        assert_eq!(
            format_with(&f, ValueFormatOptions::DIGIT_SEPARATORS, &german),
            "1.234,5"
        );
    }

    #[test]
    fn test_format_struct_and_array() {
        let i32_type = TypeInfo::primitive("i32").unwrap();
        let point = TypeInfo::Struct {
            name: "Point".to_string(),
            size: 8,
            fields: vec![
                FieldInfo::new("x", 0, i32_type.clone()),
                FieldInfo::new("y", 4, i32_type.clone()),
            ],
        };
        let mut bytes = 1i32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&2i32.to_le_bytes());
        let v = Value::new(point, None, bytes).unwrap();
        assert_eq!(
            format_with(&v, ValueFormatOptions::empty(), &Culture::invariant()),
            "Point { x: 1, y: 2 }"
        );

        let array = TypeInfo::array_of(i32_type, 4);
        let bytes: Vec<u8> = (1..=4i32).flat_map(|i| i.to_le_bytes()).collect();
        let v = Value::new(array, None, bytes).unwrap();
        assert_eq!(
            format_with(&v, ValueFormatOptions::empty(), &Culture::invariant()),
            "[1, 2, 3, ...]"
        );
    }

    #[test]
    fn test_format_null_reference() {
        let r = TypeInfo::reference_to(TypeInfo::primitive("i32").unwrap());
        let v = Value::new(r, None, vec![0; 8]).unwrap();
        assert_eq!(
            format_with(&v, ValueFormatOptions::empty(), &Culture::invariant()),
            "null"
        );
    }
}
