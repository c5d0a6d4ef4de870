//! Plain-text rendering of key/value results for the demo commands.

/// Width of the right-aligned key column.
const KEY_WIDTH: usize = 25;

/// Renders rows as `key: value` lines with right-aligned keys.
///
/// A key with several values gets one line per value.
#[must_use]
pub fn format_table<'a, I>(rows: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a [String])>,
{
    let mut out = String::from("\n");
    for (key, values) in rows {
        for value in values {
            out.push_str(&format!("{:>width$}: {}\n", key, value, width = KEY_WIDTH));
        }
    }
    out.push('\n');
    out
}

/// Prints [`format_table`] to stdout.
pub fn print_table<'a, I>(rows: I)
where
    I: IntoIterator<Item = (&'a str, &'a [String])>,
{
    print!("{}", format_table(rows));
}
