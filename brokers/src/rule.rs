//! Subscription rules.
//!
//! A topic subscription only receives the messages its rule admits. Rules use a
//! small SQL-like language over message properties:
//!
//! ```text
//! Env = 'Production'
//! Env LIKE 'Dev%' AND Region <> 'eu'
//! Tenant IS NULL OR Tenant NOT LIKE 'test_'
//! ```
//!
//! `%` matches any run of characters and `_` matches exactly one. Comparisons
//! are case-sensitive; keywords are not. `AND` binds tighter than `OR`.

use std::{fmt, iter::Peekable, str::Chars, str::FromStr};

use busenv_model::{Properties, PropertyValue};

use crate::error::{Error, Result};

/// Name of the rule a subscription gets when none is given.
pub const DEFAULT_RULE_NAME: &str = "$Default";

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRule {
    pub name: String,
    pub filter: Filter,
}

impl Default for SubscriptionRule {
    fn default() -> Self {
        Self::new(DEFAULT_RULE_NAME, Filter::True)
    }
}

impl SubscriptionRule {
    pub fn new(name: impl Into<String>, filter: Filter) -> Self {
        Self {
            name: name.into(),
            filter,
        }
    }

    /// Builds a rule from a SQL filter expression.
    pub fn sql(name: impl Into<String>, expression: &str) -> Result<Self> {
        Ok(Self::new(name, Filter::Sql(expression.parse()?)))
    }

    pub fn matches(&self, properties: &Properties) -> bool {
        self.filter.matches(properties)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Admits everything.
    True,
    Sql(SqlFilter),
}

impl Filter {
    pub fn matches(&self, properties: &Properties) -> bool {
        match self {
            Filter::True => true,
            Filter::Sql(sql) => sql.matches(properties),
        }
    }
}

/// A parsed filter expression: a disjunction of conjunctions of predicates.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFilter {
    expression: String,
    any_of: Vec<Vec<Predicate>>,
}

impl SqlFilter {
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn matches(&self, properties: &Properties) -> bool {
        self.any_of
            .iter()
            .any(|all| all.iter().all(|p| p.matches(properties)))
    }
}

impl FromStr for SqlFilter {
    type Err = Error;

    fn from_str(expression: &str) -> Result<Self> {
        let tokens = tokenize(expression)?;
        let mut parser = Parser {
            tokens: tokens.into_iter().peekable(),
        };
        let any_of = parser.disjunction()?;

        if let Some(token) = parser.tokens.next() {
            return Err(Error::InvalidFilter(format!("unexpected {}", token)));
        }

        Ok(Self {
            expression: expression.to_owned(),
            any_of,
        })
    }
}

impl fmt::Display for SqlFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Predicate {
    key: String,
    op: Op,
}

#[derive(Debug, Clone, PartialEq)]
enum Op {
    Eq(String),
    Ne(String),
    Like(Vec<char>),
    NotLike(Vec<char>),
    IsNull,
    IsNotNull,
}

impl Predicate {
    fn matches(&self, properties: &Properties) -> bool {
        let value = properties.get(&self.key);
        let text = value.and_then(PropertyValue::as_str);

        match &self.op {
            Op::Eq(expected) => text == Some(expected.as_str()),
            Op::Ne(expected) => text.map_or(false, |t| t != expected),
            Op::Like(pattern) => text.map_or(false, |t| like(pattern, t)),
            Op::NotLike(pattern) => text.map_or(false, |t| !like(pattern, t)),
            Op::IsNull => value.map_or(true, PropertyValue::is_null),
            Op::IsNotNull => value.map_or(false, |v| !v.is_null()),
        }
    }
}

/// Wildcard match with `%` (any run) and `_` (one character).
fn like(pattern: &[char], text: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(&'%') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '_' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, consumed)) => {
                    p = star + 1;
                    t = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '%')
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Literal(String),
    Eq,
    Ne,
}

impl Token {
    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => write!(f, "`{}`", w),
            Token::Literal(l) => write!(f, "'{}'", l),
            Token::Eq => f.write_str("`=`"),
            Token::Ne => f.write_str("`<>`"),
        }
    }
}

fn tokenize(expression: &str) -> Result<Vec<Token>> {
    let mut chars = expression.chars().peekable();
    let mut tokens = Vec::new();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '<' | '!' => {
                chars.next();
                match (c, chars.next()) {
                    ('<', Some('>')) | ('!', Some('=')) => tokens.push(Token::Ne),
                    _ => return Err(Error::InvalidFilter(format!("unsupported operator at `{}`", c))),
                }
            }
            '\'' => {
                chars.next();
                tokens.push(Token::Literal(literal(&mut chars)?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '.' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(word));
            }
            other => {
                return Err(Error::InvalidFilter(format!("unexpected character `{}`", other)))
            }
        }
    }

    Ok(tokens)
}

/// Reads a quoted literal after its opening quote. `''` is an escaped quote.
fn literal(chars: &mut Peekable<Chars<'_>>) -> Result<String> {
    let mut value = String::new();

    loop {
        match chars.next() {
            Some('\'') if chars.peek() == Some(&'\'') => {
                chars.next();
                value.push('\'');
            }
            Some('\'') => return Ok(value),
            Some(c) => value.push(c),
            None => return Err(Error::InvalidFilter("unterminated string literal".into())),
        }
    }
}

struct Parser {
    tokens: Peekable<std::vec::IntoIter<Token>>,
}

impl Parser {
    fn disjunction(&mut self) -> Result<Vec<Vec<Predicate>>> {
        let mut any_of = vec![self.conjunction()?];
        while self.eat_keyword("OR") {
            any_of.push(self.conjunction()?);
        }
        Ok(any_of)
    }

    fn conjunction(&mut self) -> Result<Vec<Predicate>> {
        let mut all = vec![self.predicate()?];
        while self.eat_keyword("AND") {
            all.push(self.predicate()?);
        }
        Ok(all)
    }

    fn predicate(&mut self) -> Result<Predicate> {
        let key = match self.tokens.next() {
            Some(Token::Word(key)) => key,
            Some(other) => return Err(Error::InvalidFilter(format!("expected property name, found {}", other))),
            None => return Err(Error::InvalidFilter("expected property name".into())),
        };

        let op = match self.tokens.next() {
            Some(Token::Eq) => Op::Eq(self.literal()?),
            Some(Token::Ne) => Op::Ne(self.literal()?),
            Some(t) if t.is_keyword("LIKE") => Op::Like(self.literal()?.chars().collect()),
            Some(t) if t.is_keyword("NOT") => {
                self.expect_keyword("LIKE")?;
                Op::NotLike(self.literal()?.chars().collect())
            }
            Some(t) if t.is_keyword("IS") => {
                let negated = self.eat_keyword("NOT");
                self.expect_keyword("NULL")?;
                if negated {
                    Op::IsNotNull
                } else {
                    Op::IsNull
                }
            }
            Some(other) => return Err(Error::InvalidFilter(format!("unexpected {} after `{}`", other, key))),
            None => return Err(Error::InvalidFilter(format!("missing operator after `{}`", key))),
        };

        Ok(Predicate { key, op })
    }

    fn literal(&mut self) -> Result<String> {
        match self.tokens.next() {
            Some(Token::Literal(value)) => Ok(value),
            Some(other) => Err(Error::InvalidFilter(format!("expected string literal, found {}", other))),
            None => Err(Error::InvalidFilter("expected string literal".into())),
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.tokens.peek() {
            Some(t) if t.is_keyword(keyword) => {
                self.tokens.next();
                true
            }
            _ => false,
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(Error::InvalidFilter(format!("expected {}", keyword)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), PropertyValue::from(*v)))
            .collect()
    }

    fn filter(expression: &str) -> SqlFilter {
        expression.parse().expect("valid filter")
    }

    #[test]
    fn like_without_wildcards_is_exact() {
        let env_rule = filter("Env LIKE 'Development'");

        assert!(env_rule.matches(&props(&[("Env", "Development")])));
        assert!(!env_rule.matches(&props(&[("Env", "development")])));
        assert!(!env_rule.matches(&props(&[("Env", "Development2")])));
        assert!(!env_rule.matches(&props(&[("env", "Development")])));
        assert!(!env_rule.matches(&Properties::new()));
    }

    #[test]
    fn like_wildcards() {
        assert!(like(&"Dev%".chars().collect::<Vec<_>>(), "Development"));
        assert!(like(&"%ment".chars().collect::<Vec<_>>(), "Development"));
        assert!(like(&"D_v%t".chars().collect::<Vec<_>>(), "Development"));
        assert!(like(&"%".chars().collect::<Vec<_>>(), ""));
        assert!(!like(&"_".chars().collect::<Vec<_>>(), ""));
        assert!(!like(&"Dev_".chars().collect::<Vec<_>>(), "Development"));
        assert!(like(&"%e%e%".chars().collect::<Vec<_>>(), "Development"));
    }

    #[test]
    fn equality_and_inequality() {
        let eq = filter("Env = 'Production'");
        let ne = filter("Env <> 'Production'");
        let production = props(&[("Env", "Production")]);
        let staging = props(&[("Env", "Staging")]);

        assert!(eq.matches(&production));
        assert!(!eq.matches(&staging));
        assert!(ne.matches(&staging));
        assert!(!ne.matches(&production));
        assert!(!ne.matches(&Properties::new()));
    }

    #[test]
    fn non_string_values_never_compare_equal() {
        let mut properties = Properties::new();
        properties.insert("Env".into(), PropertyValue::Int(1));

        assert!(!filter("Env = '1'").matches(&properties));
        assert!(filter("Env IS NOT NULL").matches(&properties));
    }

    #[test]
    fn null_checks() {
        let is_null = filter("Tenant IS NULL");
        let mut explicit_null = Properties::new();
        explicit_null.insert("Tenant".into(), PropertyValue::Null);

        assert!(is_null.matches(&Properties::new()));
        assert!(is_null.matches(&explicit_null));
        assert!(!is_null.matches(&props(&[("Tenant", "a")])));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let rule = filter("Env = 'Development' AND Region = 'eu' or Env = 'Production'");

        assert!(rule.matches(&props(&[("Env", "Development"), ("Region", "eu")])));
        assert!(!rule.matches(&props(&[("Env", "Development"), ("Region", "us")])));
        assert!(rule.matches(&props(&[("Env", "Production"), ("Region", "us")])));
    }

    #[test]
    fn not_like_and_escaped_quotes() {
        let rule = filter("Name NOT LIKE 'O''Brien%'");

        assert!(!rule.matches(&props(&[("Name", "O'Brien Jr")])));
        assert!(rule.matches(&props(&[("Name", "Smith")])));
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in &[
            "",
            "Env",
            "Env LIKE",
            "Env LIKE Development",
            "Env = 'unterminated",
            "Env IS NOT 'x'",
            "Env = 'a' Region = 'b'",
            "Env > 'a'",
        ] {
            let result = bad.parse::<SqlFilter>();
            assert!(matches!(result, Err(Error::InvalidFilter(_))), "{}", bad);
        }
    }

    #[test]
    fn default_rule_admits_everything() {
        let rule = SubscriptionRule::default();

        assert_eq!(rule.name, DEFAULT_RULE_NAME);
        assert!(rule.matches(&Properties::new()));
    }

    #[test]
    fn rule_keeps_expression_text() {
        let rule = SubscriptionRule::sql("EnvRule", "Env LIKE 'Development'").unwrap();

        match rule.filter {
            Filter::Sql(sql) => {
                assert_eq!(sql.expression(), "Env LIKE 'Development'");
                assert_eq!(sql.to_string(), sql.expression());
            }
            Filter::True => panic!("expected SQL filter"),
        }
    }
}
