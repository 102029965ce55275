//! SML text parser

use crate::secs2::MAX_NESTING_DEPTH;
use crate::sml::tokenizer::{Token, TokenKind, TokenStream};
use once_cell::sync::Lazy;
use regex::Regex;
use secs_core::{Item, ItemKind, ParseError, SecsResult};

static INTEGER_LITERAL: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[+-]?(?:0[xX][0-9a-fA-F]+|[0-9]+)$").ok());

/// Parse an integer literal, decimal or `0x` hex, optionally signed
pub fn parse_integer(text: &str) -> Option<i128> {
    if !INTEGER_LITERAL.as_ref().is_some_and(|re| re.is_match(text)) {
        return None;
    }
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let magnitude = match digits.get(..2) {
        Some("0x") | Some("0X") => i128::from_str_radix(&digits[2..], 16).ok()?,
        _ => digits.parse::<i128>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

/// Parse one SML item
///
/// ```text
/// item := '<' KIND [ '[' COUNT ']' ] body '>'
/// ```
pub fn parse_sml(text: &str) -> SecsResult<Item> {
    let mut stream = TokenStream::new(text)?;
    let item = parse_item(&mut stream, 0)?;
    stream.expect_end()?;
    Ok(item)
}

fn parse_item(stream: &mut TokenStream<'_>, depth: usize) -> Result<Item, ParseError> {
    stream.expect('<', "opening tag '<' expected")?;

    let has_kind = stream
        .peek()
        .is_some_and(|token| token.kind == TokenKind::Word);
    let kind_token = match has_kind {
        true => stream.next(),
        false => None,
    }
    .ok_or_else(|| stream.error_here("data type expected"))?;
    let kind = ItemKind::from_sml_name(&kind_token.text).ok_or_else(|| {
        stream.error_at(&kind_token, format!("unknown data type {}", kind_token.text))
    })?;

    let count = parse_count(stream, kind)?;

    let item = if kind == ItemKind::List {
        if depth >= MAX_NESTING_DEPTH {
            return Err(stream.error_at(
                &kind_token,
                format!("list nesting exceeds {} levels", MAX_NESTING_DEPTH),
            ));
        }
        let mut children = Vec::new();
        while stream.peek_is('<') {
            children.push(parse_item(stream, depth + 1)?);
        }
        stream.expect('>', "Closing tag '>' expected")?;
        Item::List(children)
    } else {
        let mut values = Vec::new();
        while let Some(token) = stream.peek() {
            if token.kind == TokenKind::Operator {
                break;
            }
            values.extend(stream.next());
        }
        stream.expect('>', "Closing tag '>' expected")?;
        build_scalar(stream, kind, &values)?
    };

    if let Some(count) = count {
        if count != item.len() {
            let message = if kind == ItemKind::List {
                format!("list count {} doesn't match {} items", count, item.len())
            } else {
                format!("count {} doesn't match {} values", count, item.len())
            };
            return Err(stream.error_at(&kind_token, message));
        }
    }

    Ok(item)
}

fn parse_count(stream: &mut TokenStream<'_>, kind: ItemKind) -> Result<Option<usize>, ParseError> {
    if !stream.peek_is('[') {
        return Ok(None);
    }
    stream.next();
    let token = stream
        .next()
        .ok_or_else(|| stream.error_at_end("Closing bracket ']' expected"))?;
    let count = match token.kind {
        TokenKind::Word => token.text.parse::<usize>().ok(),
        _ => None,
    }
    .ok_or_else(|| stream.error_at(&token, format!("invalid value '{}' for {}", token.text, kind)))?;
    stream.expect(']', "Closing bracket ']' expected")?;
    Ok(Some(count))
}

fn build_scalar(stream: &TokenStream<'_>, kind: ItemKind, values: &[Token]) -> Result<Item, ParseError> {
    let invalid = |token: &Token| stream.error_at(token, format!("invalid value '{}' for {}", token.text, kind));

    match kind {
        ItemKind::Ascii | ItemKind::Jis8 => {
            let mut bytes = Vec::new();
            for token in values {
                match token.kind {
                    TokenKind::Quoted => bytes.extend_from_slice(token.text.as_bytes()),
                    _ => {
                        let value = parse_integer(&token.text).ok_or_else(|| invalid(token))?;
                        ItemKind::Binary
                            .check_integer(value)
                            .map_err(|e| stream.error_at(token, e.to_string()))?;
                        bytes.push(value as u8);
                    }
                }
                if kind == ItemKind::Ascii {
                    if let Some(high) = bytes.iter().find(|b| **b > 127) {
                        let message = ItemKind::Ascii
                            .check_integer(*high as i128)
                            .err()
                            .map(|e| e.to_string())
                            .unwrap_or_default();
                        return Err(stream.error_at(token, message));
                    }
                }
            }
            Ok(if kind == ItemKind::Ascii {
                Item::Ascii(bytes)
            } else {
                Item::Jis8(bytes)
            })
        }
        ItemKind::Boolean => {
            let mut flags = Vec::with_capacity(values.len());
            for token in values {
                let flag = match (token.kind, token.text.to_ascii_lowercase().as_str()) {
                    (TokenKind::Word, "true") | (TokenKind::Word, "1") => true,
                    (TokenKind::Word, "false") | (TokenKind::Word, "0") => false,
                    _ => return Err(invalid(token)),
                };
                flags.push(flag);
            }
            Ok(Item::Boolean(flags))
        }
        ItemKind::F4 | ItemKind::F8 => {
            let mut floats = Vec::with_capacity(values.len());
            for token in values {
                if token.kind != TokenKind::Word {
                    return Err(invalid(token));
                }
                let value = token.text.parse::<f64>().map_err(|_| invalid(token))?;
                kind.check_float(value)
                    .map_err(|e| stream.error_at(token, e.to_string()))?;
                floats.push(value);
            }
            if kind == ItemKind::F4 {
                // parse again as f32 so the value is exactly what was written
                let singles = values
                    .iter()
                    .map(|token| token.text.parse::<f32>().map_err(|_| invalid(token)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Item::F4(singles))
            } else {
                Ok(Item::F8(floats))
            }
        }
        _ => {
            let mut ints = Vec::with_capacity(values.len());
            for token in values {
                let value = match token.kind {
                    TokenKind::Word => parse_integer(&token.text),
                    _ => None,
                }
                .ok_or_else(|| invalid(token))?;
                kind.check_integer(value)
                    .map_err(|e| stream.error_at(token, e.to_string()))?;
                ints.push(value);
            }
            Item::from_ints(kind, &ints).map_err(|e| stream.error_at_end(e.to_string()))
        }
    }
}
