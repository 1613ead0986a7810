//! 型記述子
//!
//! デバッグ情報のローダー（このクレートの外側）が構築する静的な型情報です。
//! 値の読み書きのサイズ決定、子要素の列挙、表示用の型名に使います。

/// ポインタ・参照のサイズ（64bit）
pub const POINTER_SIZE: u64 = 8;

/// 型情報
#[derive(Debug, Clone, PartialEq)]
pub enum TypeInfo {
    /// 基本型
    Primitive {
        name: String,
        size: u64,
    },
    /// ポインタ型
    Pointer {
        pointee_type: Option<Box<TypeInfo>>,
        size: u64,
    },
    /// 参照型
    Reference {
        referent_type: Option<Box<TypeInfo>>,
        size: u64,
    },
    /// 配列型
    Array {
        element_type: Option<Box<TypeInfo>>,
        length: Option<u64>,
    },
    /// 構造体型
    Struct {
        name: String,
        size: u64,
        fields: Vec<FieldInfo>,
    },
    /// 不明な型
    Unknown,
}

/// フィールド情報
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    /// フィールド名
    pub name: String,
    /// オフセット（バイト）
    pub offset: u64,
    /// 型情報
    pub type_info: TypeInfo,
}

impl FieldInfo {
    /// フィールド情報を作成する
    pub fn new(name: impl Into<String>, offset: u64, type_info: TypeInfo) -> Self {
        Self {
            name: name.into(),
            offset,
            type_info,
        }
    }
}

impl TypeInfo {
    /// 名前から基本型を作成する
    ///
    /// 既知の基本型でなければ `None` を返します。
    pub fn primitive(name: &str) -> Option<Self> {
        let size = match name {
            "i8" | "u8" | "bool" => 1,
            "i16" | "u16" => 2,
            "i32" | "u32" | "f32" | "char" => 4,
            "i64" | "u64" | "f64" | "isize" | "usize" => 8,
            _ => return None,
        };
        Some(TypeInfo::Primitive {
            name: name.to_string(),
            size,
        })
    }

    /// `*T` 型を作成する
    pub fn pointer_to(pointee: TypeInfo) -> Self {
        TypeInfo::Pointer {
            pointee_type: Some(Box::new(pointee)),
            size: POINTER_SIZE,
        }
    }

    /// `&T` 型を作成する
    pub fn reference_to(referent: TypeInfo) -> Self {
        TypeInfo::Reference {
            referent_type: Some(Box::new(referent)),
            size: POINTER_SIZE,
        }
    }

    /// `[T; N]` 型を作成する
    pub fn array_of(element: TypeInfo, length: u64) -> Self {
        TypeInfo::Array {
            element_type: Some(Box::new(element)),
            length: Some(length),
        }
    }

    /// 型名を取得する
    pub fn name(&self) -> String {
        match self {
            TypeInfo::Primitive { name, .. } => name.clone(),
            TypeInfo::Pointer { pointee_type, .. } => match pointee_type {
                Some(t) => format!("*{}", t.name()),
                None => "*?".to_string(),
            },
            TypeInfo::Reference { referent_type, .. } => match referent_type {
                Some(t) => format!("&{}", t.name()),
                None => "&?".to_string(),
            },
            TypeInfo::Array {
                element_type,
                length,
            } => {
                let elem = element_type
                    .as_ref()
                    .map(|t| t.name())
                    .unwrap_or_else(|| "?".to_string());
                match length {
                    Some(len) => format!("[{}; {}]", elem, len),
                    None => format!("[{}]", elem),
                }
            }
            TypeInfo::Struct { name, .. } => name.clone(),
            TypeInfo::Unknown => "?".to_string(),
        }
    }

    /// 型のサイズを取得する
    ///
    /// サイズが不明な場合は0を返します。
    pub fn size(&self) -> u64 {
        match self {
            TypeInfo::Primitive { size, .. } => *size,
            TypeInfo::Pointer { size, .. } => *size,
            TypeInfo::Reference { size, .. } => *size,
            TypeInfo::Struct { size, .. } => *size,
            TypeInfo::Array {
                element_type,
                length,
            } => {
                if let (Some(elem_type), Some(len)) = (element_type, length) {
                    elem_type.size().saturating_mul(*len)
                } else {
                    0
                }
            }
            TypeInfo::Unknown => 0,
        }
    }

    /// ポインタまたは参照か
    pub fn is_indirection(&self) -> bool {
        matches!(self, TypeInfo::Pointer { .. } | TypeInfo::Reference { .. })
    }

    /// 間接参照を1段はがした型を取得する
    ///
    /// ポインタ・参照以外の型、または参照先の型が不明な場合は `None`。
    pub fn element_type(&self) -> Option<&TypeInfo> {
        match self {
            TypeInfo::Pointer { pointee_type, .. } => pointee_type.as_deref(),
            TypeInfo::Reference { referent_type, .. } => referent_type.as_deref(),
            _ => None,
        }
    }

    /// 整数型か
    pub fn is_integer(&self) -> bool {
        match self {
            TypeInfo::Primitive { name, .. } => matches!(
                name.as_str(),
                "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize"
            ),
            _ => false,
        }
    }

    /// 符号付き整数型か
    pub fn is_signed(&self) -> bool {
        match self {
            TypeInfo::Primitive { name, .. } => {
                matches!(name.as_str(), "i8" | "i16" | "i32" | "i64" | "isize")
            }
            _ => false,
        }
    }

    /// 浮動小数点型か
    pub fn is_float(&self) -> bool {
        matches!(self, TypeInfo::Primitive { name, .. } if name == "f32" || name == "f64")
    }

    /// 型文字列をパースする
    ///
    /// デバッグ情報を持たない呼び出し側（CLIなど）向けの簡易表記です。
    /// 基本型、`*T`、`&T`、`[T; N]` をサポートします。
    ///
    /// # Examples
    /// ```
    /// use nozoki_eval::TypeInfo;
    ///
    /// let ty = TypeInfo::parse("&[u8; 4]").unwrap();
    /// assert_eq!(ty.name(), "&[u8; 4]");
    /// assert_eq!(ty.element_type().unwrap().size(), 4);
    /// ```
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();

        if let Some(rest) = input.strip_prefix('*') {
            return Self::parse(rest).map(Self::pointer_to);
        }
        if let Some(rest) = input.strip_prefix('&') {
            return Self::parse(rest).map(Self::reference_to);
        }
        if let Some(inner) = input.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            // 最後の ';' で要素型と長さに分割（要素型自体が配列の場合に対応）
            let semi = inner.rfind(';')?;
            let element = Self::parse(&inner[..semi])?;
            let length = inner[semi + 1..].trim().parse::<u64>().ok()?;
            return Some(Self::array_of(element, length));
        }

        Self::primitive(input)
    }
}
