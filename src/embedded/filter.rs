use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

use serde_json::Value;

use super::StoredDocument;
use crate::SubscriptionError;
use crate::TimeSeriesEntry;

/// Subscription query understood by the embedded server
///
/// ```text
/// from <Collection> [where <Field> = '<value>'] [include <path> | counters(['name']) | timeseries('name'), ...]
/// ```
///
/// Keywords are case-insensitive; the collection may be quoted; fields are
/// dotted paths where `[]` iterates an array (`Lines[].Product`).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SubscriptionFilter {
    collection: String,
    predicate: Option<Predicate>,
    includes: IncludeSpec,
}

#[derive(Debug, Clone, PartialEq)]
struct Predicate {
    path: String,
    value: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct IncludeSpec {
    pub(crate) document_paths: Vec<String>,
    pub(crate) counters: Vec<String>,
    pub(crate) all_counters: bool,
    pub(crate) time_series: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Symbol(char),
}

impl SubscriptionFilter {
    pub(crate) fn parse(query: &str) -> Result<Self, SubscriptionError> {
        let tokens = tokenize(query)?;
        let mut tokens = tokens.into_iter().peekable();

        expect_keyword(&mut tokens, "from")?;
        let collection = match tokens.next() {
            Some(Token::Word(w)) | Some(Token::Quoted(w)) if !w.is_empty() => w,
            _ => return Err(invalid("expected a collection name after 'from'")),
        };

        let mut predicate = None;
        if next_is_keyword(&mut tokens, "where") {
            tokens.next();
            let path = match tokens.next() {
                Some(Token::Word(w)) => w,
                _ => return Err(invalid("expected a field name after 'where'")),
            };
            if tokens.next() != Some(Token::Symbol('=')) {
                return Err(invalid("only equality predicates are supported"));
            }
            let value = match tokens.next() {
                Some(Token::Quoted(v)) | Some(Token::Word(v)) => v,
                _ => return Err(invalid("expected a value after '='")),
            };
            predicate = Some(Predicate { path, value });
        }

        let mut includes = IncludeSpec::default();
        if next_is_keyword(&mut tokens, "include") {
            tokens.next();
            loop {
                parse_include(&mut tokens, &mut includes)?;
                match tokens.peek() {
                    Some(Token::Symbol(',')) => {
                        tokens.next();
                    }
                    _ => break,
                }
            }
        }

        if let Some(extra) = tokens.next() {
            return Err(invalid(&format!("unsupported query syntax near {extra:?}")));
        }

        Ok(Self {
            collection,
            predicate,
            includes,
        })
    }

    pub(crate) fn collection(&self) -> &str {
        &self.collection
    }

    pub(crate) fn includes(&self) -> &IncludeSpec {
        &self.includes
    }

    pub(crate) fn matches(
        &self,
        doc: &StoredDocument,
    ) -> bool {
        if !doc.collection.eq_ignore_ascii_case(&self.collection) {
            return false;
        }
        match &self.predicate {
            None => true,
            Some(predicate) => resolve_path(&doc.data, &predicate.path)
                .into_iter()
                .any(|value| value_equals(value, &predicate.value)),
        }
    }
}

impl IncludeSpec {
    /// Keys of the related documents referenced by `doc`
    pub(crate) fn document_keys(
        &self,
        doc: &StoredDocument,
    ) -> Vec<String> {
        self.document_paths
            .iter()
            .flat_map(|path| resolve_path(&doc.data, path))
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect()
    }

    /// Counters of `doc` to ship along with it, `None` when none were asked for
    pub(crate) fn counters_of(
        &self,
        doc: &StoredDocument,
    ) -> Option<HashMap<String, i64>> {
        if self.all_counters {
            return Some(doc.counters.clone());
        }
        if self.counters.is_empty() {
            return None;
        }
        Some(
            self.counters
                .iter()
                .filter_map(|name| doc.counters.get(name).map(|v| (name.clone(), *v)))
                .collect(),
        )
    }

    /// Requested time series of `doc` that it actually has
    pub(crate) fn time_series_of(
        &self,
        doc: &StoredDocument,
    ) -> Option<HashMap<String, Vec<TimeSeriesEntry>>> {
        let series: HashMap<_, _> = self
            .time_series
            .iter()
            .filter_map(|name| doc.time_series.get(name).map(|entries| (name.clone(), entries.clone())))
            .collect();
        (!series.is_empty()).then_some(series)
    }
}

fn parse_include(
    tokens: &mut Peekable<std::vec::IntoIter<Token>>,
    includes: &mut IncludeSpec,
) -> Result<(), SubscriptionError> {
    let word = match tokens.next() {
        Some(Token::Word(w)) => w,
        _ => return Err(invalid("expected an include item")),
    };

    let is_call = matches!(tokens.peek(), Some(Token::Symbol('(')));
    if !is_call {
        includes.document_paths.push(word);
        return Ok(());
    }
    tokens.next();

    let argument = match tokens.next() {
        Some(Token::Quoted(arg)) => {
            if tokens.next() != Some(Token::Symbol(')')) {
                return Err(invalid("expected ')'"));
            }
            Some(arg)
        }
        Some(Token::Symbol(')')) => None,
        _ => return Err(invalid("expected a quoted name or ')'")),
    };

    match (word.to_ascii_lowercase().as_str(), argument) {
        ("counters", Some(name)) => includes.counters.push(name),
        ("counters", None) => includes.all_counters = true,
        ("timeseries", Some(name)) => includes.time_series.push(name),
        (other, _) => return Err(invalid(&format!("unsupported include function '{other}'"))),
    }
    Ok(())
}

fn tokenize(query: &str) -> Result<Vec<Token>, SubscriptionError> {
    let mut tokens = Vec::new();
    let mut chars = query.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '\'' | '"' => {
                chars.next();
                tokens.push(Token::Quoted(read_quoted(&mut chars, c)?));
            }
            '=' | ',' | '(' | ')' => {
                chars.next();
                tokens.push(Token::Symbol(c));
            }
            c if is_word_char(c) => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_word_char(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
            other => return Err(invalid(&format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

fn read_quoted(
    chars: &mut Peekable<Chars<'_>>,
    quote: char,
) -> Result<String, SubscriptionError> {
    let mut value = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => value.push(escaped),
                None => break,
            },
            c if c == quote => return Ok(value),
            c => value.push(c),
        }
    }
    Err(invalid("unterminated string literal"))
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '[' | ']' | '@' | '/' | '-')
}

fn next_is_keyword(
    tokens: &mut Peekable<std::vec::IntoIter<Token>>,
    keyword: &str,
) -> bool {
    matches!(tokens.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
}

fn expect_keyword(
    tokens: &mut Peekable<std::vec::IntoIter<Token>>,
    keyword: &str,
) -> Result<(), SubscriptionError> {
    if next_is_keyword(tokens, keyword) {
        tokens.next();
        Ok(())
    } else {
        Err(invalid(&format!("query must start with '{keyword}'")))
    }
}

/// Values found at `path`; `[]` fans out over array elements
fn resolve_path<'a>(
    value: &'a Value,
    path: &str,
) -> Vec<&'a Value> {
    let mut current = vec![value];
    for segment in path.split('.') {
        let (field, iterate) = match segment.strip_suffix("[]") {
            Some(field) => (field, true),
            None => (segment, false),
        };
        current = current
            .into_iter()
            .filter_map(|v| v.get(field))
            .flat_map(|v| match (iterate, v) {
                (true, Value::Array(items)) => items.iter().collect::<Vec<_>>(),
                (true, _) => Vec::new(),
                (false, v) => vec![v],
            })
            .collect();
    }
    current
}

fn value_equals(
    value: &Value,
    expected: &str,
) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Number(n) => n.to_string() == expected,
        Value::Bool(b) => b.to_string() == expected,
        _ => false,
    }
}

fn invalid(message: &str) -> SubscriptionError {
    SubscriptionError::InvalidDefinition(message.to_string())
}
