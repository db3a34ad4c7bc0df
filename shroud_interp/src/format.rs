//! The format-spec mini-language and `str.format`.

use crate::error::{InterpError, InterpResult};
use crate::value::Value;
use shroud_compiler::repr::float_repr;

/// A parsed `[[fill]align][sign][#][0][width][grouping][.precision][type]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatSpec {
    /// Padding character.
    pub fill: char,
    /// One of `<`, `>`, `^`, `=`.
    pub align: Option<char>,
    /// One of `+`, `-`, ` `.
    pub sign: Option<char>,
    /// `#` given.
    pub alternate: bool,
    /// Minimum width.
    pub width: usize,
    /// `,` or `_`.
    pub grouping: Option<char>,
    /// Digits after the point, or maximum string length.
    pub precision: Option<usize>,
    /// Presentation type.
    pub kind: Option<char>,
}

fn is_align(c: char) -> bool {
    matches!(c, '<' | '>' | '^' | '=')
}

/// Parse a format spec.
pub fn parse_spec(spec: &str) -> InterpResult<FormatSpec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = FormatSpec {
        fill: ' ',
        ..FormatSpec::default()
    };
    let mut i = 0;
    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = chars[0];
        out.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().is_some_and(is_align) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i)
        && matches!(c, '+' | '-' | ' ')
    {
        out.sign = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'#') {
        out.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        if out.align.is_none() {
            out.fill = '0';
            out.align = Some('=');
        }
        i += 1;
    }
    let digits = |i: &mut usize| {
        let start = *i;
        while chars.get(*i).is_some_and(char::is_ascii_digit) {
            *i += 1;
        }
        chars[start..*i].iter().collect::<String>().parse::<usize>().ok()
    };
    out.width = digits(&mut i).unwrap_or(0);
    if let Some(&c) = chars.get(i)
        && matches!(c, ',' | '_')
    {
        out.grouping = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        out.precision = Some(
            digits(&mut i).ok_or_else(|| InterpError::value_error("Format specifier missing precision"))?,
        );
    }
    if let Some(&c) = chars.get(i) {
        out.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(InterpError::value_error("Invalid format specifier"));
    }
    Ok(out)
}

/// `format(value, spec)`
pub fn format_value(value: &Value, spec: &str) -> InterpResult<String> {
    if spec.is_empty() {
        return Ok(value.to_str());
    }
    let spec = parse_spec(spec)?;
    match value {
        Value::Int(_) | Value::Bool(_) => format_int(value.as_int()?, &spec),
        Value::Float(v) => format_float(*v, &spec),
        Value::Str(s) => {
            if !matches!(spec.kind, None | Some('s')) {
                return Err(unknown_code(spec.kind, "str"));
            }
            let text: String = match spec.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s.clone(),
            };
            Ok(pad(&text, &spec, '<'))
        }
        other => Ok(pad(&other.to_str(), &spec, '<')),
    }
}

fn unknown_code(kind: Option<char>, type_name: &str) -> InterpError {
    InterpError::value_error(format!(
        "Unknown format code '{}' for object of type '{type_name}'",
        kind.unwrap_or(' ')
    ))
}

fn sign_prefix(negative: bool, sign: Option<char>) -> &'static str {
    match (negative, sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    }
}

fn group(digits: &str, sep: char, every: usize) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / every);
    let len = digits.len();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % every == 0 {
            out.push(sep);
        }
        out.push(c);
    }
    out
}

fn format_int(v: i128, spec: &FormatSpec) -> InterpResult<String> {
    let magnitude = v.unsigned_abs();
    let (digits, prefix, every) = match spec.kind {
        None | Some('d' | 'n') => (magnitude.to_string(), "", 3),
        Some('x') => (format!("{magnitude:x}"), "0x", 4),
        Some('X') => (format!("{magnitude:X}"), "0X", 4),
        Some('o') => (format!("{magnitude:o}"), "0o", 4),
        Some('b') => (format!("{magnitude:b}"), "0b", 4),
        Some('c') => {
            let c = u32::try_from(v)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| InterpError::Overflow {
                    message: "%c arg not in range(0x110000)".into(),
                })?;
            return Ok(pad(&c.to_string(), spec, '<'));
        }
        Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => return format_float(v as f64, spec),
        other => return Err(unknown_code(other, "int")),
    };
    let digits = match spec.grouping {
        Some(sep) => group(&digits, sep, every),
        None => digits,
    };
    let prefix = if spec.alternate { prefix } else { "" };
    Ok(pad_number(sign_prefix(v < 0, spec.sign), prefix, &digits, spec))
}

fn format_float(v: f64, spec: &FormatSpec) -> InterpResult<String> {
    let negative = v.is_sign_negative() && !v.is_nan();
    let magnitude = v.abs();
    let body = if !magnitude.is_finite() {
        let text = if magnitude.is_nan() { "nan" } else { "inf" };
        if matches!(spec.kind, Some('E' | 'F' | 'G')) {
            text.to_uppercase()
        } else {
            text.to_string()
        }
    } else {
        match spec.kind {
            Some('f' | 'F') => format!("{magnitude:.*}", spec.precision.unwrap_or(6)),
            Some('e' | 'E') => {
                let text = exponent(magnitude, spec.precision.unwrap_or(6));
                if spec.kind == Some('E') { text.to_uppercase() } else { text }
            }
            Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), magnitude * 100.0),
            Some('g' | 'G') => {
                let text = general(magnitude, spec.precision.unwrap_or(6), spec.alternate);
                if spec.kind == Some('G') { text.to_uppercase() } else { text }
            }
            None => match spec.precision {
                Some(p) => general(magnitude, p, true),
                None => float_repr(magnitude),
            },
            other => return Err(unknown_code(other, "float")),
        }
    };
    let body = match spec.grouping {
        Some(sep) if magnitude.is_finite() => {
            let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
            format!("{}{}", group(&body[..split], sep, 3), &body[split..])
        }
        _ => body,
    };
    Ok(pad_number(sign_prefix(negative, spec.sign), "", &body, spec))
}

/// `%e` with a two-digit minimum exponent.
fn exponent(v: f64, precision: usize) -> String {
    let text = format!("{v:.precision$e}");
    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => text,
    }
}

/// `%g`: fixed or exponent notation by magnitude, trailing zeros removed
/// unless `keep_point`.
fn general(v: f64, precision: usize, keep_point: bool) -> String {
    let precision = precision.max(1);
    if v == 0.0 {
        return if keep_point { "0.0".into() } else { "0".into() };
    }
    let rounded = exponent(v, precision - 1);
    let (mantissa, e) = rounded.split_once('e').unwrap_or((&rounded, "+00"));
    let exp = e.parse::<i64>().unwrap_or(0);
    if exp < -4 || exp >= precision as i64 {
        format!("{}e{e}", trim_zeros(mantissa, false))
    } else {
        let decimals = (precision as i64 - 1 - exp).max(0) as usize;
        trim_zeros(&format!("{v:.decimals$}"), keep_point)
    }
}

fn trim_zeros(text: &str, keep_point: bool) -> String {
    if !text.contains('.') {
        return if keep_point { format!("{text}.0") } else { text.to_string() };
    }
    let trimmed = text.trim_end_matches('0');
    match trimmed.strip_suffix('.') {
        Some(whole) if keep_point => format!("{whole}.0"),
        Some(whole) => whole.to_string(),
        None => trimmed.to_string(),
    }
}

fn pad(text: &str, spec: &FormatSpec, default_align: char) -> String {
    let len = text.chars().count();
    if len >= spec.width {
        return text.to_string();
    }
    let gap = spec.width - len;
    let fill = |n: usize| std::iter::repeat_n(spec.fill, n).collect::<String>();
    match spec.align.unwrap_or(default_align) {
        '>' | '=' => format!("{}{text}", fill(gap)),
        '^' => format!("{}{text}{}", fill(gap / 2), fill(gap - gap / 2)),
        _ => format!("{text}{}", fill(gap)),
    }
}

fn pad_number(sign: &str, prefix: &str, digits: &str, spec: &FormatSpec) -> String {
    if spec.align == Some('=') {
        let used = sign.len() + prefix.len() + digits.chars().count();
        let gap = spec.width.saturating_sub(used);
        let fill: String = std::iter::repeat_n(spec.fill, gap).collect();
        return format!("{sign}{prefix}{fill}{digits}");
    }
    pad(&format!("{sign}{prefix}{digits}"), spec, '>')
}

/// One replacement field of a format string.
enum Field {
    Literal(String),
    Replace {
        name: String,
        conversion: Option<char>,
        spec: String,
    },
}

fn parse_template(template: &str) -> InterpResult<Vec<Field>> {
    let mut fields = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '}' => return Err(InterpError::value_error("Single '}' encountered in format string")),
            '{' => {
                if !literal.is_empty() {
                    fields.push(Field::Literal(std::mem::take(&mut literal)));
                }
                let mut depth = 1;
                let mut inner = String::new();
                for c in chars.by_ref() {
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    inner.push(c);
                }
                if depth != 0 {
                    return Err(InterpError::value_error("expected '}' before end of string"));
                }
                let (head, spec) = inner.split_once(':').unwrap_or((&inner, ""));
                let (name, conversion) = match head.split_once('!') {
                    Some((name, conv)) => (name, conv.chars().next()),
                    None => (head, None),
                };
                fields.push(Field::Replace {
                    name: name.to_string(),
                    conversion,
                    spec: spec.to_string(),
                });
            }
            c => literal.push(c),
        }
    }
    if !literal.is_empty() {
        fields.push(Field::Literal(literal));
    }
    Ok(fields)
}

/// Apply a `!s`, `!r` or `!a` conversion.
pub fn convert(value: &Value, conversion: Option<char>) -> InterpResult<Value> {
    Ok(match conversion {
        None => value.clone(),
        Some('s') => Value::Str(value.to_str()),
        Some('r') => Value::Str(value.repr()),
        Some('a') => Value::Str(crate::builtins::ascii(value)),
        Some(other) => {
            return Err(InterpError::value_error(format!(
                "Unknown conversion specifier {other}"
            )));
        }
    })
}

/// `template.format(*args, **kwargs)`
pub fn format_str(template: &str, args: &[Value], kwargs: &[(String, Value)]) -> InterpResult<String> {
    render(template, args, kwargs, &mut 0)
}

/// Nested specs share the automatic field counter with their parent.
fn render(
    template: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
    auto: &mut usize,
) -> InterpResult<String> {
    let mut out = String::new();
    for field in parse_template(template)? {
        match field {
            Field::Literal(text) => out.push_str(&text),
            Field::Replace { name, conversion, spec } => {
                let value = if name.is_empty() {
                    *auto += 1;
                    args.get(*auto - 1)
                } else if let Ok(index) = name.parse::<usize>() {
                    args.get(index)
                } else {
                    kwargs.iter().find(|(k, _)| *k == name).map(|(_, v)| v)
                }
                .ok_or_else(|| InterpError::IndexError {
                    type_name: "format argument".into(),
                })?;
                let spec = if spec.contains('{') {
                    render(&spec, args, kwargs, auto)?
                } else {
                    spec
                };
                out.push_str(&format_value(&convert(value, conversion)?, &spec)?);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Value::Int(7), ">3", "  7")]
    #[case(Value::Int(7), "03", "007")]
    #[case(Value::Int(-7), "04", "-007")]
    #[case(Value::Int(255), "#x", "0xff")]
    #[case(Value::Int(5), "b", "101")]
    #[case(Value::Int(1_234_567), ",", "1,234,567")]
    #[case(Value::Int(42), "+", "+42")]
    #[case(Value::Int(3), "*^5", "**3**")]
    #[case(Value::Float(3.14159), ".2f", "3.14")]
    #[case(Value::Float(0.5), "%", "50.000000%")]
    #[case(Value::Float(1234.5), ".3e", "1.234e+03")]
    #[case(Value::Float(0.0001), "g", "0.0001")]
    #[case(Value::Float(1e-5), "g", "1e-05")]
    #[case(Value::Float(2.5), "", "2.5")]
    #[case(Value::Str("ab".into()), "<4", "ab  ")]
    #[case(Value::Str("abcdef".into()), ".2", "ab")]
    #[case(Value::Bool(true), ">5", "    1")]
    fn test_format_value(#[case] value: Value, #[case] spec: &str, #[case] expected: &str) {
        assert_eq!(format_value(&value, spec).unwrap(), expected);
    }

    #[test]
    fn test_format_str_fields() {
        let args = [Value::Int(1), Value::Str("x".into())];
        let kwargs = [("k".to_string(), Value::Int(9))];
        assert_eq!(format_str("{}-{}", &args, &[]).unwrap(), "1-x");
        assert_eq!(format_str("{1}{0}", &args, &[]).unwrap(), "x1");
        assert_eq!(format_str("{k:>3}", &args, &kwargs).unwrap(), "  9");
        assert_eq!(format_str("{{}}{!r}", &args[1..], &[]).unwrap(), "{}'x'");
        assert_eq!(format_str("{:>{}}", &[Value::Int(5), Value::Int(3)], &[]).unwrap(), "  5");
    }

    #[test]
    fn test_unbalanced_brace_is_an_error() {
        assert!(format_str("}", &[], &[]).is_err());
        assert!(format_str("{", &[], &[]).is_err());
    }

    #[test]
    fn test_unknown_code() {
        assert!(format_value(&Value::Str("s".into()), "d").is_err());
    }
}
