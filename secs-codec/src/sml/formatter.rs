//! SML text rendering

use crate::secs2::MAX_NESTING_DEPTH;
use secs_core::Item;

/// Render an item as SML text
pub trait ToSml {
    fn to_sml(&self) -> String;
}

impl ToSml for Item {
    fn to_sml(&self) -> String {
        format_item(self)
    }
}

/// Render an item as SML
///
/// Lists put each child on its own line, indented two spaces per level,
/// with the closing `>` on a line of its own:
///
/// ```text
/// <L [2]
///   <A "secsgem">
///   <U1 1 2>
/// >
/// ```
///
/// Lists nested deeper than [`MAX_NESTING_DEPTH`] are elided as
/// `<L [n] ...>`.
pub fn format_item(item: &Item) -> String {
    let mut out = String::new();
    write_item(&mut out, item, 0);
    out
}

fn write_item(out: &mut String, item: &Item, indent: usize) {
    match item {
        Item::List(children) if children.is_empty() => out.push_str("<L [0]>"),
        Item::List(children) if indent / 2 >= MAX_NESTING_DEPTH => {
            out.push_str(&format!("<L [{}] ...>", children.len()));
        }
        Item::List(children) => {
            out.push_str(&format!("<L [{}]", children.len()));
            for child in children {
                out.push('\n');
                out.push_str(&" ".repeat(indent + 2));
                write_item(out, child, indent + 2);
            }
            out.push('\n');
            out.push_str(&" ".repeat(indent));
            out.push('>');
        }
        _ => {
            let values = scalar_values(item);
            if values.is_empty() {
                out.push_str(&format!("<{}>", item.kind()));
            } else {
                out.push_str(&format!("<{} {}>", item.kind(), values.join(" ")));
            }
        }
    }
}

fn scalar_values(item: &Item) -> Vec<String> {
    fn display<T: ToString>(values: &[T]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    match item {
        Item::List(_) => Vec::new(),
        Item::Ascii(bytes) | Item::Jis8(bytes) => text_values(bytes),
        Item::Binary(bytes) => bytes.iter().map(|b| format!("0x{:02X}", b)).collect(),
        Item::Boolean(v) => v
            .iter()
            .map(|b| if *b { "True" } else { "False" }.to_string())
            .collect(),
        Item::I1(v) => display(v),
        Item::I2(v) => display(v),
        Item::I4(v) => display(v),
        Item::I8(v) => display(v),
        Item::U1(v) => display(v),
        Item::U2(v) => display(v),
        Item::U4(v) => display(v),
        Item::U8(v) => display(v),
        Item::F4(v) => display(v),
        Item::F8(v) => display(v),
    }
}

/// Quoted runs of printable characters, `0xNN` for everything else
fn text_values(bytes: &[u8]) -> Vec<String> {
    let mut parts = Vec::new();
    let mut run = String::new();
    for byte in bytes {
        if (0x20..=0x7E).contains(byte) && *byte != b'"' {
            run.push(*byte as char);
            continue;
        }
        if !run.is_empty() {
            parts.push(format!("\"{}\"", run));
            run.clear();
        }
        parts.push(format!("0x{:02X}", byte));
    }
    if !run.is_empty() {
        parts.push(format!("\"{}\"", run));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_scalars() {
        assert_eq!(Item::u1(5).to_sml(), "<U1 5>");
        assert_eq!(Item::I2(vec![-1, 2]).to_sml(), "<I2 -1 2>");
        assert_eq!(Item::Binary(vec![0x0A, 0xFF]).to_sml(), "<B 0x0A 0xFF>");
        assert_eq!(Item::Boolean(vec![true, false]).to_sml(), "<BOOLEAN True False>");
        assert_eq!(Item::F8(vec![1.5]).to_sml(), "<F8 1.5>");
        assert_eq!(Item::U4(vec![]).to_sml(), "<U4>");
    }

    #[test]
    fn test_format_text_escapes() {
        assert_eq!(Item::ascii("hello").unwrap().to_sml(), "<A \"hello\">");
        assert_eq!(
            Item::ascii("a\"b\n").unwrap().to_sml(),
            "<A \"a\" 0x22 \"b\" 0x0A>"
        );
        assert_eq!(Item::Ascii(vec![]).to_sml(), "<A>");
    }

    #[test]
    fn test_format_nested_list() {
        let item = Item::list(vec![
            Item::ascii("MDLN").unwrap(),
            Item::list(vec![Item::u1(1)]),
            Item::list(vec![]),
        ]);
        assert_eq!(
            item.to_sml(),
            "<L [3]\n  <A \"MDLN\">\n  <L [1]\n    <U1 1>\n  >\n  <L [0]>\n>"
        );
    }

    #[test]
    fn test_format_elides_deep_nesting() {
        let mut item = Item::list(vec![Item::u1(1)]);
        for _ in 0..MAX_NESTING_DEPTH {
            item = Item::list(vec![item]);
        }
        let text = item.to_sml();
        assert!(text.contains("<L [1] ...>"));
        assert!(!text.contains("<U1 1>"));
        assert_eq!(text.lines().count(), 2 * MAX_NESTING_DEPTH + 1);
    }
}
