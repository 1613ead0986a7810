//! パース関連のユーティリティ関数

use anyhow::Result;

/// アドレス文字列をu64にパース
///
/// 16進数（0xプレフィックス付き）または10進数をサポート
///
/// # Examples
/// ```
/// use nozoki_eval::parse::parse_address;
///
/// assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
/// assert_eq!(parse_address("1234").unwrap(), 1234);
/// ```
pub fn parse_address(s: &str) -> Result<u64> {
    let s = s.trim();

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        // 16進数
        u64::from_str_radix(hex, 16)
            .map_err(|e| anyhow::anyhow!("Invalid hexadecimal address '{}': {}", s, e))
    } else {
        // 10進数を試す
        s.parse::<u64>()
            .or_else(|_| {
                // 10進数でもダメなら16進数として解釈を試みる
                u64::from_str_radix(s, 16)
            })
            .map_err(|e| anyhow::anyhow!("Invalid address '{}': {}", s, e))
    }
}

/// フレームベース相対のアドレスをパース
///
/// `fb-0x14` や `fb+8` の形式をフレームベースからのオフセットとして解決し、
/// それ以外は `parse_address` と同じく絶対アドレスとして扱います。
///
/// # Examples
/// ```
/// use nozoki_eval::parse::parse_frame_address;
///
/// assert_eq!(parse_frame_address("fb-0x10", 0x7000).unwrap(), 0x6ff0);
/// assert_eq!(parse_frame_address("0x10", 0x7000).unwrap(), 0x10);
/// ```
pub fn parse_frame_address(s: &str, frame_base: u64) -> Result<u64> {
    let s = s.trim();

    let Some(rest) = s.strip_prefix("fb") else {
        return parse_address(s);
    };

    if rest.is_empty() {
        return Ok(frame_base);
    }
    if let Some(offset) = rest.strip_prefix('-') {
        Ok(frame_base.wrapping_sub(parse_address(offset)?))
    } else if let Some(offset) = rest.strip_prefix('+') {
        Ok(frame_base.wrapping_add(parse_address(offset)?))
    } else {
        // "fb10" のような16進アドレス
        parse_address(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_hex() {
        assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
        assert_eq!(parse_address("0X1234").unwrap(), 0x1234);
        assert_eq!(parse_address("0xabcd").unwrap(), 0xabcd);
        assert_eq!(parse_address("0xABCD").unwrap(), 0xabcd);
    }

    #[test]
    fn test_parse_address_dec() {
        assert_eq!(parse_address("1234").unwrap(), 1234);
        assert_eq!(parse_address("9999").unwrap(), 9999);
    }

    #[test]
    fn test_parse_address_invalid() {
        assert!(parse_address("xyz").is_err());
        assert!(parse_address("0xghij").is_err());
    }

    #[test]
    fn test_parse_frame_address() {
        assert_eq!(parse_frame_address("fb", 0x100).unwrap(), 0x100);
        assert_eq!(parse_frame_address("fb+8", 0x100).unwrap(), 0x108);
        assert_eq!(parse_frame_address("fb-0x20", 0x100).unwrap(), 0xe0);
        assert_eq!(parse_frame_address("fb10", 0x100).unwrap(), 0xfb10);
        assert!(parse_frame_address("fb*2", 0x100).is_err());
    }
}
