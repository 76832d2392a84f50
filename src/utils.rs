use crate::EDFLIB_TIME_DIMENSION;

/// 检查字符串是否为有效的整数
pub fn is_integer_number(s: &str) -> bool {
    let s = s.trim();
    let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// 检查字符串是否为有效的数字（包括浮点数）
///
/// Only plain decimal notation is accepted; `inf`, `NaN` and exponents are
/// not valid in a header field.
pub fn is_number(s: &str) -> bool {
    let s = s.trim();
    let body = s.strip_prefix(['+', '-']).unwrap_or(s);
    let mut seen_digit = false;
    let mut seen_dot = false;
    for c in body.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => return false,
        }
    }
    seen_digit
}

/// 解析EDF时间字符串为100纳秒单位
///
/// Digits past the seventh decimal are dropped.
pub fn parse_edf_time(s: &str) -> Option<i64> {
    let s = s.trim();

    // 处理符号
    let (negative, s) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    let (integer_part, decimal_part) = match s.find('.') {
        Some(dot_pos) => (&s[..dot_pos], &s[dot_pos + 1..]),
        None => (s, ""),
    };
    if integer_part.is_empty() && decimal_part.is_empty() {
        return None;
    }
    if !integer_part.bytes().all(|b| b.is_ascii_digit())
        || !decimal_part.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let mut value = if integer_part.is_empty() {
        0
    } else {
        integer_part
            .parse::<i64>()
            .ok()?
            .checked_mul(EDFLIB_TIME_DIMENSION)?
    };

    // 解析小数部分（最多7位精度）
    if !decimal_part.is_empty() {
        let decimal_str = &decimal_part[..decimal_part.len().min(7)];
        let decimal_value = decimal_str.parse::<i64>().ok()?;
        value = value.checked_add(decimal_value * 10i64.pow(7 - decimal_str.len() as u32))?;
    }

    if negative {
        value.checked_neg()
    } else {
        Some(value)
    }
}

/// Formats 100 ns ticks as decimal seconds without trailing zeros
/// (`15_000_000` -> `"1.5"`, `-2_500_000` -> `"-0.25"`).
pub fn format_edf_time(ticks: i64) -> String {
    let sign = if ticks < 0 { "-" } else { "" };
    let abs = ticks.unsigned_abs();
    let dim = EDFLIB_TIME_DIMENSION as u64;
    let (seconds, fraction) = (abs / dim, abs % dim);
    if fraction == 0 {
        format!("{}{}", sign, seconds)
    } else {
        let fraction = format!("{:07}", fraction);
        format!("{}{}.{}", sign, seconds, fraction.trim_end_matches('0'))
    }
}

/// Formats a number into at most `width` ASCII characters.
///
/// Integral values are written without a decimal point. Otherwise the number
/// of decimals is reduced until the text fits; the result never uses
/// exponent notation. Returns `None` when even the integer part is too wide.
pub fn format_number(value: f64, width: usize) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        let text = format!("{}", value as i64);
        return (text.len() <= width).then_some(text);
    }
    for decimals in (0..width).rev() {
        let mut text = format!("{:.*}", decimals, value);
        if text.contains('.') {
            let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
            text.truncate(trimmed);
        }
        if text == "-0" {
            text = "0".to_string();
        }
        if text.len() <= width {
            return Some(text);
        }
    }
    None
}

// 工具函数：把头部文本编码为单字节 (ASCII, 兼容 Latin-1)
//
// Returns `None` for control characters and anything above U+00FF.
pub fn header_bytes(s: &str) -> Option<Vec<u8>> {
    s.chars()
        .map(|c| u8::try_from(c).ok().filter(|&b| b >= 0x20 && b != 0x7f))
        .collect()
}
