//! SFDL parser
//!
//! ```text
//! node := '<' 'L' [ '[' NAME | COUNT ']' ] node* '>'
//!       | '<' DATA_ITEM '>'
//! ```

use crate::sfdl::structure::{DataItemLookup, Structure};
use crate::sml::tokenizer::{TokenKind, TokenStream};
use secs_core::{ParseError, SecsResult};

/// Parse a structure definition, resolving data item names through `items`
pub fn parse_sfdl(text: &str, items: &dyn DataItemLookup) -> SecsResult<Structure> {
    let mut stream = TokenStream::new(text)?;
    let structure = parse_node(&mut stream, items)?;
    stream.expect_end()?;
    Ok(structure)
}

fn parse_node(stream: &mut TokenStream<'_>, items: &dyn DataItemLookup) -> Result<Structure, ParseError> {
    stream.expect('<', "opening tag '<' expected")?;

    let has_name = stream
        .peek()
        .is_some_and(|token| token.kind == TokenKind::Word);
    let token = match has_name {
        true => stream.next(),
        false => None,
    }
    .ok_or_else(|| stream.error_here("data type expected"))?;

    if !token.text.eq_ignore_ascii_case("L") {
        if items.kinds_of(&token.text).is_none() {
            return Err(stream.error_at(&token, format!("unknown data item {}", token.text)));
        }
        stream.expect('>', "Closing tag '>' expected")?;
        return Ok(Structure::DataItem(token.text));
    }

    let mut bracket = None;
    if stream.peek_is('[') {
        stream.next();
        let inner = stream
            .next()
            .ok_or_else(|| stream.error_at_end("Closing bracket ']' expected"))?;
        if inner.kind == TokenKind::Operator {
            return Err(stream.error_at(&inner, format!("invalid value '{}' for L", inner.text)));
        }
        stream.expect(']', "Closing bracket ']' expected")?;
        bracket = Some(inner);
    }

    let mut children = Vec::new();
    while stream.peek_is('<') {
        children.push(parse_node(stream, items)?);
    }
    stream.expect('>', "Closing tag '>' expected")?;

    match bracket {
        None => Ok(Structure::List(children)),
        Some(inner) => match inner.text.parse::<usize>() {
            Ok(count) if count == children.len() => Ok(Structure::List(children)),
            Ok(count) => Err(stream.error_at(
                &token,
                format!("list count {} doesn't match {} items", count, children.len()),
            )),
            Err(_) if children.len() == 1 => Ok(Structure::OpenList {
                name: inner.text,
                element: Box::new(children.remove(0)),
            }),
            Err(_) => Err(stream.error_at(
                &inner,
                format!("open list [{}] requires exactly one child", inner.text),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secs_core::{ItemKind, SecsError};
    use std::collections::HashMap;

    fn catalog() -> HashMap<String, Vec<ItemKind>> {
        ["DSID", "MDLN", "SOFTREV", "COMMACK", "CEID", "RPTID", "V"]
            .iter()
            .map(|name| (name.to_string(), vec![ItemKind::Ascii]))
            .collect()
    }

    fn parse_error(text: &str) -> ParseError {
        match parse_sfdl(text, &catalog()) {
            Err(SecsError::Parse(e)) => e,
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_nested() {
        let text = "< L\n  < COMMACK >\n  < L [MDLN]\n    < MDLN >\n  >\n>";
        let structure = parse_sfdl(text, &catalog()).unwrap();
        assert_eq!(
            structure,
            Structure::List(vec![
                Structure::DataItem("COMMACK".to_string()),
                Structure::OpenList {
                    name: "MDLN".to_string(),
                    element: Box::new(Structure::DataItem("MDLN".to_string())),
                },
            ])
        );
    }

    #[test]
    fn test_display_parses_back() {
        let text = "<L [RPTID] <L <RPTID> <L [V] <V>>>>";
        let structure = parse_sfdl(text, &catalog()).unwrap();
        assert_eq!(parse_sfdl(&structure.to_string(), &catalog()).unwrap(), structure);
    }

    #[test]
    fn test_counted_list() {
        assert!(parse_sfdl("<L [2] <MDLN> <SOFTREV>>", &catalog()).is_ok());
        assert_eq!(
            parse_error("<L [3] <MDLN> <SOFTREV>>").message,
            "list count 3 doesn't match 2 items"
        );
    }

    #[test]
    fn test_missing_closing_tag_caret() {
        let err = parse_error("< DSID");
        assert_eq!(err.column, 7);
        assert!(err.to_string().ends_with("Closing tag '>' expected"));
        assert_eq!(err.to_string(), "< DSID\n      ^-- Closing tag '>' expected");
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse_error("DSID>").message, "opening tag '<' expected");
        assert_eq!(parse_error("<>").message, "data type expected");
        assert_eq!(parse_error("<NOPE>").message, "unknown data item NOPE");
        assert_eq!(parse_error("<L [V <V>>").message, "Closing bracket ']' expected");
        assert_eq!(
            parse_error("<L [V] <V> <V>>").message,
            "open list [V] requires exactly one child"
        );
        assert_eq!(parse_error("<DSID> <DSID>").message, "unexpected token '<'");
    }
}
