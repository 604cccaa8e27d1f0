//! Error message templates of shape assertions.
//!
//! Templates use the `{index[,layout][:options]}` replacement syntax: `index`
//! selects one of the error message inputs, `layout` is
//! `[[fill]align]width` with `align` one of `-` (left), `=` (center) or `+`
//! (right, the default), and `options` selects the integer rendering (`d`,
//! `n` for digit grouping, `x`/`X` for hexadecimal). A doubled `{{` renders
//! a single `{`.
//!
//! Templates are checked with [`validate_placeholders`] before they are ever
//! rendered with [`format_message`].
use fancy_regex::Regex;
use log::warn;
use once_cell::sync::Lazy;
use thiserror::Error;

/// Maximum number of error message inputs a shape assertion may carry.
pub const MAX_ERROR_MESSAGE_INPUTS: usize = 4;

/// `{` followed by an index and one of the characters that may follow an
/// index in a replacement field.
static FORMAT_SPECIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([0-9]+)[,:}]").expect("pattern should be valid"));

/// A replacement field found while scanning a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Index of the referenced input. Saturates at `usize::MAX` for indices
    /// that do not fit.
    pub index: usize,
    /// Matched text, e.g. `{0}` or `{1,`.
    pub spec: String,
}

/// Lazy sequence of the placeholders of a template.
///
/// Each step takes the first match in a working copy of the template and
/// removes it, so the sequence always ends. Clone the iterator (or call
/// [`placeholders`] again) to restart the scan.
#[derive(Debug, Clone)]
pub struct Placeholders {
    remaining: String,
}

/// Scan `template` for placeholders.
pub fn placeholders(template: &str) -> Placeholders {
    Placeholders {
        remaining: template.to_string(),
    }
}

impl Iterator for Placeholders {
    type Item = Placeholder;

    fn next(&mut self) -> Option<Self::Item> {
        let captures = match FORMAT_SPECIFIER.captures(&self.remaining) {
            Ok(captures) => captures?,
            Err(err) => {
                warn!("placeholder scan aborted: {}", err);
                return None;
            }
        };
        let whole = captures.get(0)?;
        let index = captures
            .get(1)
            .map(|digits| digits.as_str().parse().unwrap_or(usize::MAX))?;

        let range = whole.range();
        let placeholder = Placeholder {
            index,
            spec: whole.as_str().to_string(),
        };
        self.remaining.replace_range(range, "");
        Some(placeholder)
    }
}

/// A placeholder referencing a missing input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "expects error_message to contain format specifiers with error_message_input index less than {input_count}. Found specifier {spec}"
)]
pub struct PlaceholderError {
    pub input_count: usize,
    pub spec: String,
}

/// Check that every placeholder of `template` references one of
/// `input_count` inputs.
pub fn validate_placeholders(template: &str, input_count: usize) -> Result<(), PlaceholderError> {
    match placeholders(template).find(|placeholder| placeholder.index >= input_count) {
        Some(placeholder) => Err(PlaceholderError {
            input_count,
            spec: placeholder.spec,
        }),
        None => Ok(()),
    }
}

/// Render `template` with `inputs`.
///
/// Without inputs the template is returned as is. Templates with more than
/// [`MAX_ERROR_MESSAGE_INPUTS`] inputs are returned as is as well.
pub fn format_message(template: &str, inputs: &[i64]) -> String {
    match inputs.len() {
        0 => template.to_string(),
        n if n > MAX_ERROR_MESSAGE_INPUTS => {
            warn!(
                "error message has {} inputs, at most {} are substituted; returning the template unchanged",
                n, MAX_ERROR_MESSAGE_INPUTS
            );
            template.to_string()
        }
        _ => render(template, inputs),
    }
}

fn render(template: &str, inputs: &[i64]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while !rest.is_empty() {
        let Some(open) = rest.find('{') else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..open]);
        rest = &rest[open..];

        let braces = rest.find(|c| c != '{').unwrap_or(rest.len());
        if braces >= 2 {
            let escaped = braces / 2;
            out.extend(std::iter::repeat_n('{', escaped));
            rest = &rest[escaped * 2..];
            continue;
        }

        let Some(close) = rest.find('}') else {
            out.push_str(rest);
            break;
        };
        if let Some(next_open) = rest[1..].find('{').map(|i| i + 1)
            && next_open < close
        {
            out.push_str(&rest[..next_open]);
            rest = &rest[next_open..];
            continue;
        }

        let field = &rest[..=close];
        match Replacement::parse(&rest[1..close]) {
            Some(replacement) => match inputs.get(replacement.index) {
                Some(value) => replacement.write(&mut out, *value),
                None => out.push_str(field),
            },
            None => out.push_str(field),
        }
        rest = &rest[close + 1..];
    }

    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Center,
    Right,
}

impl Align {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '-' => Some(Align::Left),
            '=' => Some(Align::Center),
            '+' => Some(Align::Right),
            _ => None,
        }
    }
}

/// Parsed content of a replacement field.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Replacement<'a> {
    index: usize,
    align: Align,
    fill: char,
    width: usize,
    options: &'a str,
}

/// Split the leading run of ASCII digits off `s`.
fn split_number(s: &str) -> Option<(usize, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let value = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}

impl<'a> Replacement<'a> {
    fn parse(spec: &'a str) -> Option<Self> {
        let (index, rest) = split_number(spec.trim())?;
        let mut replacement = Replacement {
            index,
            align: Align::Right,
            fill: ' ',
            width: 0,
            options: "",
        };

        let mut rest = rest.trim();
        if let Some(layout) = rest.strip_prefix(',') {
            let mut chars = layout.chars();
            let first = chars.next();
            let second = chars.next();
            let layout = match (first, second.and_then(Align::from_char)) {
                (Some(fill), Some(align)) => {
                    replacement.fill = fill;
                    replacement.align = align;
                    &layout[fill.len_utf8() + 1..]
                }
                _ => match first.and_then(Align::from_char) {
                    Some(align) => {
                        replacement.align = align;
                        &layout[1..]
                    }
                    None => layout,
                },
            };
            let (width, after) = split_number(layout).unwrap_or((0, layout));
            replacement.width = width;
            rest = after.trim();
        }

        if let Some(options) = rest.strip_prefix(':') {
            replacement.options = options.trim();
        } else if !rest.is_empty() {
            return None;
        }
        Some(replacement)
    }

    fn write(&self, out: &mut String, value: i64) {
        let text = render_integer(value, self.options);
        let len = text.chars().count();
        if len >= self.width {
            out.push_str(&text);
            return;
        }

        let padding = self.width - len;
        let (before, after) = match self.align {
            Align::Left => (0, padding),
            Align::Center => (padding / 2, padding - padding / 2),
            Align::Right => (padding, 0),
        };
        out.extend(std::iter::repeat_n(self.fill, before));
        out.push_str(&text);
        out.extend(std::iter::repeat_n(self.fill, after));
    }
}

/// Render an integer according to the option string of a replacement
/// field. Unknown options render plain decimal.
fn render_integer(value: i64, options: &str) -> String {
    let hex = [
        ("x-", false, false),
        ("X-", true, false),
        ("x+", false, true),
        ("X+", true, true),
        ("x", false, true),
        ("X", true, true),
    ]
    .into_iter()
    .find_map(|(style, upper, prefixed)| {
        options
            .strip_prefix(style)
            .map(|digits| (upper, prefixed, digits))
    });

    if let Some((upper, prefixed, digits)) = hex {
        let digits = split_number(digits).map(|(n, _)| n).unwrap_or(0);
        let mut body = if upper {
            format!("{:X}", value as u64)
        } else {
            format!("{:x}", value as u64)
        };
        if body.len() < digits {
            body = format!("{}{}", "0".repeat(digits - body.len()), body);
        }
        return if prefixed { format!("0x{}", body) } else { body };
    }

    let (grouped, rest) = if let Some(rest) = options.strip_prefix(['n', 'N']) {
        (true, rest)
    } else if let Some(rest) = options.strip_prefix(['d', 'D']) {
        (false, rest)
    } else {
        (false, options)
    };
    let min_digits = split_number(rest).map(|(n, _)| n).unwrap_or(0);

    let mut digits = value.unsigned_abs().to_string();
    if grouped {
        digits = group_thousands(&digits);
    } else if digits.len() < min_digits {
        digits = format!("{}{}", "0".repeat(min_digits - digits.len()), digits);
    }

    if value < 0 {
        format!("-{}", digits)
    } else {
        digits
    }
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_inputs_in_order() {
        assert_eq!(
            format_message("bad value {0}, expected {1}", &[3, 7]),
            "bad value 3, expected 7"
        );
        assert_eq!(format_message("{1} then {0} then {1}", &[1, 2]), "2 then 1 then 2");
    }

    #[test]
    fn zero_inputs_return_template_verbatim() {
        assert_eq!(format_message("literal {{0}} {0}", &[]), "literal {{0}} {0}");
    }

    #[test]
    fn too_many_inputs_return_template_unchanged() {
        assert_eq!(format_message("{0} {4}", &[1, 2, 3, 4, 5]), "{0} {4}");
    }

    #[test]
    fn escaped_braces() {
        assert_eq!(format_message("{{0}} is {0}", &[5]), "{0}} is 5");
        assert_eq!(format_message("{{{{", &[5]), "{{");
    }

    #[test]
    fn missing_inputs_are_emitted_verbatim() {
        assert_eq!(format_message("{0} and {3:x}", &[1]), "1 and {3:x}");
    }

    #[test]
    fn unterminated_fields_are_literal() {
        assert_eq!(format_message("size {0", &[1]), "size {0");
        assert_eq!(format_message("a {b {0}", &[9]), "a {b 9");
    }

    #[test]
    fn layout_and_options() {
        assert_eq!(format_message("[{0,5}]", &[42]), "[   42]");
        assert_eq!(format_message("[{0,-5}]", &[42]), "[42   ]");
        assert_eq!(format_message("[{0,=6}]", &[42]), "[  42  ]");
        assert_eq!(format_message("[{0,*+4}]", &[7]), "[***7]");
        assert_eq!(format_message("{0:x}", &[255]), "0xff");
        assert_eq!(format_message("{0:X-}", &[255]), "FF");
        assert_eq!(format_message("{0:X}", &[255]), "0xFF");
        assert_eq!(format_message("{0:X+4}", &[171]), "0x00AB");
        assert_eq!(format_message("{0:x4}", &[255]), "0x00ff");
        assert_eq!(format_message("{0:N}", &[-1234567]), "-1,234,567");
        assert_eq!(format_message("{0:D4}", &[12]), "0012");
        assert_eq!(format_message("{ 0 ,4 : d }", &[1]), "   1");
    }

    #[test]
    fn placeholders_are_scanned_lazily() {
        let mut scan = placeholders("{0} {1,3} {2:x} {x} {{3}");
        let first = scan.next().unwrap();
        assert_eq!(first, Placeholder { index: 0, spec: "{0}".to_string() });

        let restarted = scan.clone();
        let rest: Vec<_> = scan.map(|p| p.spec).collect();
        assert_eq!(rest, vec!["{1,", "{2:", "{3}"]);
        assert_eq!(restarted.count(), 3);
    }

    #[test]
    fn validation_names_offending_specifier() {
        assert!(validate_placeholders("{0} {1}", 2).is_ok());
        assert!(validate_placeholders("no fields", 0).is_ok());

        let err = validate_placeholders("{0} {2:x}", 2).unwrap_err();
        assert_eq!(
            err.to_string(),
            "expects error_message to contain format specifiers with error_message_input index less than 2. Found specifier {2:"
        );
    }

    #[test]
    fn huge_indices_fail_validation() {
        let err = validate_placeholders("{99999999999999999999999}", 4).unwrap_err();
        assert_eq!(err.spec, "{99999999999999999999999}");
    }

    #[test]
    fn stripping_exposes_nested_placeholders() {
        // Removing `{0}` turns `{{0}1}` into `{1}`.
        let specs: Vec<_> = placeholders("{{0}1}").map(|p| p.spec).collect();
        assert_eq!(specs, vec!["{0}", "{1}"]);
        assert!(validate_placeholders("{{0}1}", 1).is_err());
    }
}
