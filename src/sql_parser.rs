//! Splitting SQL scripts into statements.
//!
//! The engine is the authority on what a statement does; tokenizing here
//! only decides where one statement ends and the next begins.

use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::ParserError;
use sqlparser::tokenizer::{Token, Tokenizer};

/// Split a script into statements on top-level semicolons.
///
/// Works on tokens, so semicolons inside string literals or comments do not
/// split, and statements the parser does not understand are kept as-is.
pub fn split_statements(script: &str) -> Result<Vec<String>, ParserError> {
    let tokens = Tokenizer::new(&DuckDbDialect {}, script).tokenize()?;

    let mut statements = Vec::new();
    let mut current = String::new();
    for token in tokens {
        match token {
            Token::SemiColon => push_statement(&mut statements, &mut current),
            // Leading whitespace and comments are dropped.
            Token::Whitespace(_) if current.is_empty() => {}
            other => current.push_str(&other.to_string()),
        }
    }
    push_statement(&mut statements, &mut current);
    Ok(statements)
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_respects_string_literals() -> Result<(), ParserError> {
        let statements = split_statements(
            "CREATE TABLE t (a VARCHAR);\n  INSERT INTO t VALUES ('x;y');\n\nDELETE FROM t;",
        )?;
        assert_eq!(
            statements,
            vec![
                "CREATE TABLE t (a VARCHAR)".to_string(),
                "INSERT INTO t VALUES ('x;y')".to_string(),
                "DELETE FROM t".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn split_of_blank_script_is_empty() -> Result<(), ParserError> {
        assert!(split_statements("  ;\n ; ")?.is_empty());
        Ok(())
    }
}
