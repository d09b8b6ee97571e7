//! Number formatting shared by every view.

/// Round to a whole number and group thousands with spaces: `150 000`.
pub fn format_grouped(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{}", rounded.abs() as u64);
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if rounded < 0.0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

/// Compact form for large amounts: `150K`, `1.5M`. Below a thousand the
/// grouped form is used.
pub fn format_compact(value: f64) -> String {
    if value >= 1_000_000.0 {
        format!("{}M", one_decimal(value / 1_000_000.0))
    } else if value >= 1_000.0 {
        format!("{}K", one_decimal(value / 1_000.0))
    } else {
        format_grouped(value)
    }
}

fn one_decimal(value: f64) -> String {
    let s = format!("{:.1}", value);
    match s.strip_suffix(".0") {
        Some(whole) => whole.to_string(),
        None => s,
    }
}

/// Amount with a currency suffix, as shown in listings and audit messages.
pub fn format_money(value: f64) -> String {
    format!("{} €", format_grouped(value))
}
