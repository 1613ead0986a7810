//! REPLコマンド

use nozoki_eval::TypeInfo;

/// REPLコマンド
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// ローカル変数を登録: `local <name> <type> <addr>`
    Local {
        name: String,
        type_info: TypeInfo,
        address: String,
    },
    /// ローカル変数一覧
    Locals,
    /// 式の値を表示
    Print { expression: String, hex: bool },
    /// 子要素を表示
    Children {
        expression: String,
        index: u64,
        count: Option<usize>,
    },
    /// 代入: `set <expr> = <rhs>`
    Set { target: String, value: String },
    /// 評価セッションを終了してレジスタを読み直す
    Refresh,
    /// ヘルプ表示
    Help,
    /// 終了
    Quit,
}

impl Command {
    /// コマンド文字列をパースする
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let (head, rest) = match input.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (input, ""),
        };

        match head {
            "local" => {
                let parts: Vec<&str> = rest.split_whitespace().collect();
                let (name, address) = match parts.as_slice() {
                    [name, .., address] if parts.len() >= 3 => (*name, *address),
                    _ => return None,
                };
                // 型名は空白を含みうる（`[i32; 4]`）
                let type_str = parts[1..parts.len() - 1].join(" ");
                Some(Command::Local {
                    name: name.to_string(),
                    type_info: TypeInfo::parse(&type_str)?,
                    address: address.to_string(),
                })
            }
            "locals" | "l" => Some(Command::Locals),
            "print" | "p" | "print/x" | "p/x" => {
                if rest.is_empty() {
                    return None;
                }
                Some(Command::Print {
                    expression: rest.to_string(),
                    hex: head.ends_with("/x"),
                })
            }
            "children" | "ch" => {
                let parts: Vec<&str> = rest.split_whitespace().collect();
                let (expression, index, count) = match parts.as_slice() {
                    [expr] => (*expr, 0, None),
                    [expr, index] => (*expr, index.parse().ok()?, None),
                    [expr, index, count] => (*expr, index.parse().ok()?, Some(count.parse().ok()?)),
                    _ => return None,
                };
                Some(Command::Children {
                    expression: expression.to_string(),
                    index,
                    count,
                })
            }
            "set" => {
                let (target, value) = rest.split_once('=')?;
                let (target, value) = (target.trim(), value.trim());
                if target.is_empty() || value.is_empty() {
                    return None;
                }
                Some(Command::Set {
                    target: target.to_string(),
                    value: value.to_string(),
                })
            }
            "refresh" | "r" => Some(Command::Refresh),
            "help" | "h" | "?" => Some(Command::Help),
            "quit" | "q" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}
