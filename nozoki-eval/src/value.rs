//! 実体化された値
//!
//! デバッグ対象のメモリから読み取ったバイト列と型情報の組です。

use crate::types::TypeInfo;

/// 実体化された値
///
/// バイト列の長さは常に型のサイズと一致します（`Value::new` で検査）。
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    type_info: TypeInfo,
    /// 値が置かれているデバッグ対象上のアドレス（リテラルなどは `None`）
    address: Option<u64>,
    bytes: Vec<u8>,
}

impl Value {
    /// 値を作成する
    ///
    /// バイト列の長さが型のサイズと一致しなければ `None` を返します。
    pub fn new(type_info: TypeInfo, address: Option<u64>, bytes: Vec<u8>) -> Option<Self> {
        if bytes.len() as u64 != type_info.size() {
            return None;
        }
        Some(Self {
            type_info,
            address,
            bytes,
        })
    }

    /// 整数リテラルを作成する
    pub fn from_i64(value: i64) -> Self {
        Self {
            type_info: TypeInfo::Primitive {
                name: "i64".to_string(),
                size: 8,
            },
            address: None,
            bytes: value.to_le_bytes().to_vec(),
        }
    }

    /// 浮動小数点リテラルを作成する
    pub fn from_f64(value: f64) -> Self {
        Self {
            type_info: TypeInfo::Primitive {
                name: "f64".to_string(),
                size: 8,
            },
            address: None,
            bytes: value.to_le_bytes().to_vec(),
        }
    }

    /// 真偽値リテラルを作成する
    pub fn from_bool(value: bool) -> Self {
        Self {
            type_info: TypeInfo::Primitive {
                name: "bool".to_string(),
                size: 1,
            },
            address: None,
            bytes: vec![value as u8],
        }
    }

    /// 型情報を取得する
    pub fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    /// 値のアドレスを取得する
    pub fn address(&self) -> Option<u64> {
        self.address
    }

    /// 生のバイト列を取得する
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// ポインタ・参照値が指すアドレスを取得する
    pub fn target_address(&self) -> Option<u64> {
        if !self.type_info.is_indirection() {
            return None;
        }
        le_array::<8>(&self.bytes).map(u64::from_le_bytes)
    }

    /// 部分値（フィールド・配列要素）を切り出す
    pub fn slice(&self, offset: u64, type_info: &TypeInfo) -> Option<Value> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(usize::try_from(type_info.size()).ok()?)?;
        let bytes = self.bytes.get(start..end)?.to_vec();
        Value::new(
            type_info.clone(),
            self.address.map(|a| a.wrapping_add(offset)),
            bytes,
        )
    }

    /// 基本型の値をデコードする
    pub fn decode(&self) -> DisplayValue {
        match &self.type_info {
            TypeInfo::Primitive { name, .. } => decode_primitive(&self.bytes, name),
            TypeInfo::Pointer { .. } | TypeInfo::Reference { .. } => self
                .target_address()
                .map(DisplayValue::Ptr)
                .unwrap_or(DisplayValue::Unavailable),
            _ => DisplayValue::Unavailable,
        }
    }

    /// 指定した型に変換したバイト列を作る
    ///
    /// 整数同士（範囲検査つき）、整数・浮動小数点間、アドレス値のポインタへの
    /// 代入をサポートします。変換できない場合はエラーメッセージを返します。
    pub fn convert_to(&self, target: &TypeInfo) -> std::result::Result<Vec<u8>, String> {
        let size = target.size() as usize;

        if self.type_info == *target {
            return Ok(self.bytes.clone());
        }

        let source = self.decode();

        if target.is_integer() {
            let wide: i128 = match source {
                DisplayValue::Int(v) => v as i128,
                DisplayValue::Uint(v) => v as i128,
                _ => return Err(self.mismatch(target)),
            };
            let bits = size as u32 * 8;
            let (min, max) = if target.is_signed() {
                (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
            } else {
                (0, (1i128 << bits) - 1)
            };
            if wide < min || wide > max {
                return Err(format!(
                    "Value {} does not fit in '{}'",
                    wide,
                    target.name()
                ));
            }
            return Ok(wide.to_le_bytes()[..size].to_vec());
        }

        if target.is_float() {
            let v = match source {
                DisplayValue::Int(v) => v as f64,
                DisplayValue::Uint(v) => v as f64,
                DisplayValue::Float(v) => v,
                _ => return Err(self.mismatch(target)),
            };
            return Ok(if size == 4 {
                (v as f32).to_le_bytes().to_vec()
            } else {
                v.to_le_bytes().to_vec()
            });
        }

        match (target, source) {
            (TypeInfo::Primitive { name, .. }, DisplayValue::Bool(b)) if name == "bool" => {
                Ok(vec![b as u8])
            }
            (TypeInfo::Pointer { .. }, DisplayValue::Uint(addr)) => Ok(addr.to_le_bytes().to_vec()),
            (TypeInfo::Pointer { .. }, DisplayValue::Int(addr)) if addr >= 0 => {
                Ok((addr as u64).to_le_bytes().to_vec())
            }
            (TypeInfo::Pointer { .. }, DisplayValue::Ptr(addr)) => Ok(addr.to_le_bytes().to_vec()),
            _ => Err(self.mismatch(target)),
        }
    }

    fn mismatch(&self, target: &TypeInfo) -> String {
        format!(
            "Cannot convert '{}' to '{}'",
            self.type_info.name(),
            target.name()
        )
    }
}

/// デコード結果の表示値
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayValue {
    /// 整数
    Int(i64),
    /// 符号なし整数
    Uint(u64),
    /// 浮動小数点
    Float(f64),
    /// 真偽値
    Bool(bool),
    /// 文字
    Char(char),
    /// ポインタ
    Ptr(u64),
    /// 利用不可
    Unavailable,
}

impl std::fmt::Display for DisplayValue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DisplayValue::Int(v) => write!(f, "{}", v),
            DisplayValue::Uint(v) => write!(f, "{}", v),
            DisplayValue::Float(v) => write!(f, "{}", v),
            DisplayValue::Bool(v) => write!(f, "{}", v),
            DisplayValue::Char(c) => write!(f, "'{}'", c),
            DisplayValue::Ptr(addr) => write!(f, "0x{:x}", addr),
            DisplayValue::Unavailable => write!(f, "<unavailable>"),
        }
    }
}

/// 先頭Nバイトを配列として取り出す
fn le_array<const N: usize>(bytes: &[u8]) -> Option<[u8; N]> {
    bytes.get(..N)?.try_into().ok()
}

/// プリミティブ型をデコードする
pub fn decode_primitive(bytes: &[u8], type_name: &str) -> DisplayValue {
    let decoded = match type_name {
        "i8" => le_array::<1>(bytes).map(|a| DisplayValue::Int(i8::from_le_bytes(a) as i64)),
        "i16" => le_array::<2>(bytes).map(|a| DisplayValue::Int(i16::from_le_bytes(a) as i64)),
        "i32" => le_array::<4>(bytes).map(|a| DisplayValue::Int(i32::from_le_bytes(a) as i64)),
        "i64" | "isize" => le_array::<8>(bytes).map(|a| DisplayValue::Int(i64::from_le_bytes(a))),
        "u8" => le_array::<1>(bytes).map(|a| DisplayValue::Uint(a[0] as u64)),
        "u16" => le_array::<2>(bytes).map(|a| DisplayValue::Uint(u16::from_le_bytes(a) as u64)),
        "u32" => le_array::<4>(bytes).map(|a| DisplayValue::Uint(u32::from_le_bytes(a) as u64)),
        "u64" | "usize" => le_array::<8>(bytes).map(|a| DisplayValue::Uint(u64::from_le_bytes(a))),
        "f32" => {
            le_array::<4>(bytes).map(|a| DisplayValue::Float(f32::from_le_bytes(a) as f64))
        }
        "f64" => le_array::<8>(bytes).map(|a| DisplayValue::Float(f64::from_le_bytes(a))),
        "bool" => le_array::<1>(bytes).map(|a| DisplayValue::Bool(a[0] != 0)),
        "char" => le_array::<4>(bytes)
            .and_then(|a| char::from_u32(u32::from_le_bytes(a)))
            .map(DisplayValue::Char),
        _ => None,
    };
    decoded.unwrap_or(DisplayValue::Unavailable)
}
