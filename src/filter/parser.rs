use super::ast::{CompareOp, Filter};
use thiserror::Error;

/// Deepest `(`-nesting accepted. Parsing and evaluation both recurse per
/// level, so this also bounds evaluation.
pub const MAX_DEPTH: usize = 256;

pub struct Parser<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
}

/// A malformed filter string. `pos` is a byte offset into the input.
///
/// Anything other than whitespace after the top-level filter is malformed
/// too: `(cn=Alice)(sn=Smith)` fails at position 10 instead of silently
/// dropping the second filter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed filter at position {pos}: {message}")]
pub struct ParseError {
    pub message: String,
    pub pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
        }
    }

    pub fn parse(mut self) -> Result<Filter, ParseError> {
        if self.input.trim().is_empty() {
            return Ok(Filter::match_all());
        }
        let filter = self.parse_filter()?;
        self.skip_whitespace();
        // a second top-level filter is rejected, not ignored
        if self.pos < self.input.len() {
            return Err(self.error("unexpected input after filter"));
        }
        Ok(filter)
    }

    fn parse_filter(&mut self) -> Result<Filter, ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("filter nested too deeply"));
        }
        self.depth += 1;
        let result = self.parse_node();
        self.depth -= 1;
        result
    }

    fn parse_node(&mut self) -> Result<Filter, ParseError> {
        self.skip_whitespace();
        if !self.match_char('(') {
            return Err(self.error("expected '('"));
        }
        self.skip_whitespace();

        if self.match_char('&') {
            return Ok(Filter::And(self.parse_group()?));
        }
        if self.match_char('|') {
            return Ok(Filter::Or(self.parse_group()?));
        }
        if self.match_char('!') {
            let child = self.parse_filter()?;
            self.skip_whitespace();
            if !self.match_char(')') {
                return Err(self.error("expected ')' after negated filter"));
            }
            return Ok(Filter::Not(Box::new(child)));
        }

        self.parse_item()
    }

    fn parse_group(&mut self) -> Result<Vec<Filter>, ParseError> {
        let mut children = Vec::new();
        loop {
            self.skip_whitespace();
            if self.current_char() != Some('(') {
                break;
            }
            children.push(self.parse_filter()?);
        }
        if !self.match_char(')') {
            return Err(self.error("expected ')' to close filter group"));
        }
        Ok(children)
    }

    fn parse_item(&mut self) -> Result<Filter, ParseError> {
        let start = self.pos;
        let Some(op_pos) = self.find_from(start, |c| matches!(c, '=' | '>' | '<' | ')')) else {
            self.pos = self.input.len();
            return Err(self.error("unexpected end of input before operator"));
        };
        if op_pos == start && !self.input[op_pos..].starts_with(')') {
            return Err(self.error("empty attribute name"));
        }
        let attr = self.input[start..op_pos].trim().to_string();

        self.pos = op_pos;
        let op = self.parse_operator()?;

        let value_start = self.pos;
        let Some(close) = self.find_from(value_start, |c| c == ')') else {
            self.pos = self.input.len();
            return Err(self.error("expected ')' after value"));
        };
        let value = self.input[value_start..close].trim();
        self.pos = close + 1;

        Ok(classify(attr, op, value))
    }

    fn parse_operator(&mut self) -> Result<Option<CompareOp>, ParseError> {
        if self.match_char('=') {
            return Ok(None);
        }
        if self.match_char('>') {
            if self.match_char('=') {
                return Ok(Some(CompareOp::Ge));
            }
            return Ok(Some(CompareOp::Gt));
        }
        if self.match_char('<') {
            if self.match_char('=') {
                return Ok(Some(CompareOp::Le));
            }
            return Ok(Some(CompareOp::Lt));
        }
        Err(self.error("expected operator (=, >=, >, <=, <)"))
    }

    fn find_from(&self, from: usize, pred: impl Fn(char) -> bool) -> Option<usize> {
        self.input[from..].find(pred).map(|i| from + i)
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.current_char() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn current_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn match_char(&mut self, c: char) -> bool {
        if self.current_char() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn error(&self, message: &str) -> ParseError {
        ParseError {
            message: message.to_string(),
            pos: self.pos,
        }
    }
}

/// Turns a leaf `attr op value` into its node kind. `op` is `None` for `=`.
fn classify(attr: String, op: Option<CompareOp>, value: &str) -> Filter {
    match op {
        Some(op) => Filter::Compare {
            attr,
            op,
            value: value.parse().ok(),
        },
        None if value == "*" => Filter::Presence { attr },
        None if value.contains('*') => Filter::Substring {
            attr,
            pattern: value.replace('*', "").to_lowercase(),
        },
        None => Filter::Equality {
            attr,
            value: value.to_string(),
        },
    }
}

pub fn parse(input: &str) -> Result<Filter, ParseError> {
    Parser::new(input).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(attr: &str, value: &str) -> Filter {
        Filter::Equality {
            attr: attr.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_empty_input_matches_all() {
        assert_eq!(parse("").unwrap(), Filter::match_all());
        assert_eq!(parse("  \t\n").unwrap(), Filter::match_all());
    }

    #[test]
    fn test_simple_equality() {
        assert_eq!(parse("(cn=Alice)").unwrap(), eq("cn", "Alice"));
    }

    #[test]
    fn test_attr_and_value_are_trimmed() {
        assert_eq!(parse("  ( cn  =  Alice Smith )  ").unwrap(), eq("cn", "Alice Smith"));
    }

    #[test]
    fn test_presence() {
        assert_eq!(
            parse("(mail=*)").unwrap(),
            Filter::Presence {
                attr: "mail".to_string()
            }
        );
        assert_eq!(
            parse("(mail= * )").unwrap(),
            Filter::Presence {
                attr: "mail".to_string()
            }
        );
    }

    #[test]
    fn test_substring_strips_every_wildcard() {
        for input in ["(cn=Al*)", "(cn=*Al)", "(cn=*A*l*)"] {
            assert_eq!(
                parse(input).unwrap(),
                Filter::Substring {
                    attr: "cn".to_string(),
                    pattern: "al".to_string(),
                },
                "{input}"
            );
        }
    }

    #[test]
    fn test_comparison_operators() {
        let cases = [
            ("(uidNumber>=1000)", CompareOp::Ge),
            ("(uidNumber>1000)", CompareOp::Gt),
            ("(uidNumber<=1000)", CompareOp::Le),
            ("(uidNumber<1000)", CompareOp::Lt),
        ];
        for (input, op) in cases {
            assert_eq!(
                parse(input).unwrap(),
                Filter::Compare {
                    attr: "uidNumber".to_string(),
                    op,
                    value: Some(1000),
                }
            );
        }
    }

    #[test]
    fn test_unparseable_comparison_value_is_not_an_error() {
        assert_eq!(
            parse("(uidNumber>=many)").unwrap(),
            Filter::Compare {
                attr: "uidNumber".to_string(),
                op: CompareOp::Ge,
                value: None,
            }
        );
    }

    #[test]
    fn test_nested_groups() {
        let filter = parse("(&(cn=Alice)(|(sn=Smith)(!(mail=*))))").unwrap();
        let Filter::And(children) = filter else {
            panic!("expected AND");
        };
        assert_eq!(children.len(), 2);
        assert_eq!(children[0], eq("cn", "Alice"));
        let Filter::Or(inner) = &children[1] else {
            panic!("expected OR");
        };
        assert_eq!(inner.len(), 2);
        assert!(matches!(inner[1], Filter::Not(_)));
    }

    #[test]
    fn test_whitespace_between_group_members() {
        let filter = parse("( & (cn=a)\n  (sn=b) )").unwrap();
        assert_eq!(filter, Filter::And(vec![eq("cn", "a"), eq("sn", "b")]));
    }

    #[test]
    fn test_empty_groups() {
        assert_eq!(parse("(&)").unwrap(), Filter::And(vec![]));
        assert_eq!(parse("(|)").unwrap(), Filter::Or(vec![]));
    }

    #[test]
    fn test_value_may_contain_equals() {
        assert_eq!(
            parse("(dn=cn=alice,ou=people)").unwrap(),
            eq("dn", "cn=alice,ou=people")
        );
    }

    #[test]
    fn test_missing_closing_paren() {
        assert!(parse("(cn=Alice").is_err());
        assert!(parse("(&(cn=Alice)").is_err());
        assert!(parse("(!(cn=Alice)").is_err());
    }

    #[test]
    fn test_missing_opening_paren() {
        assert!(parse("cn=Alice)").is_err());
        assert!(parse("(&cn=Alice)").is_err());
    }

    #[test]
    fn test_negation_requires_a_filter() {
        assert!(parse("(!)").is_err());
        assert!(parse("(!(a=1)(b=2))").is_err());
    }

    #[test]
    fn test_missing_operator() {
        let err = parse("(cn)").unwrap_err();
        assert_eq!(err.pos, 3);
        assert!(parse("(cn").is_err());
        assert!(parse("()").is_err());
    }

    #[test]
    fn test_empty_attribute_name() {
        let err = parse("(=Alice)").unwrap_err();
        assert_eq!(err.message, "empty attribute name");
        assert!(parse("( >=5)").is_err());
    }

    #[test]
    fn test_trailing_input_rejected() {
        assert!(parse("(cn=Alice)x").is_err());
        let err = parse("(cn=Alice)(sn=Smith)").unwrap_err();
        assert_eq!(err.pos, 10);
        assert_eq!(err.message, "unexpected input after filter");
        assert!(parse("(cn=Alice)   ").is_ok());
    }

    fn nested_not(levels: usize) -> String {
        format!("{}(cn=a){}", "(!".repeat(levels), ")".repeat(levels))
    }

    #[test]
    fn test_nesting_limit() {
        assert!(parse(&nested_not(MAX_DEPTH - 1)).is_ok());

        let err = parse(&nested_not(MAX_DEPTH)).unwrap_err();
        assert_eq!(err.message, "filter nested too deeply");
        assert_eq!(err.pos, MAX_DEPTH * 2);
    }

    #[test]
    fn test_hostile_nesting_is_an_error() {
        assert!(parse(&nested_not(10_000)).is_err());
        assert!(parse(&"(&".repeat(100_000)).is_err());
        assert!(parse(&"(|(cn=a)".repeat(50_000)).is_err());
    }

    #[test]
    fn test_wide_groups_are_not_limited() {
        let input = format!("(|{})", "(cn=a)".repeat(10_000));
        let Filter::Or(children) = parse(&input).unwrap() else {
            panic!("expected OR");
        };
        assert_eq!(children.len(), 10_000);
    }

    #[test]
    fn test_error_display() {
        let err = parse("(cn=Alice").unwrap_err();
        assert_eq!(
            err.to_string(),
            "malformed filter at position 9: expected ')' after value"
        );
    }

    #[test]
    fn test_reparse_is_identical() {
        let input = "(&(memberOf=Admins)(uidNumber>=1000)(!(cn=*test*)))";
        assert_eq!(parse(input).unwrap(), parse(input).unwrap());
    }
}
