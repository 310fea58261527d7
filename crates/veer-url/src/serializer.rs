//! Text ⇄ [`UrlTree`] codec
//!
//! The parser is a single left-to-right cursor over the remaining input with
//! no backtracking; every `consume`/`capture` either advances or fails with a
//! [`ParseError`]. Serialization is a right inverse of parsing up to
//! normalization: redundant empty groups are dropped, so
//! `serialize(parse(s))` denotes the same tree as `s` without necessarily
//! being byte-equal.

use crate::tree::{
    QueryParams, QueryValue, UrlSegment, UrlSegmentGroup, UrlTree, PRIMARY_OUTLET,
};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Error produced by [`UrlSerializer::parse`] on malformed input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected \"{expected}\" in url \"{url}\"")]
    ExpectedLiteral { expected: String, url: String },
    #[error("cannot have matrix params on an empty path segment in url \"{url}\"")]
    EmptyPathMatrixParams { url: String },
    #[error("unbalanced outlet group in url \"{url}\"")]
    UnbalancedGroup { url: String },
    #[error("outlet group entry without an outlet name in url \"{url}\"")]
    MissingOutletName { url: String },
    #[error("unexpected character after outlet group path in url \"{url}\"")]
    UnexpectedGroupCharacter { url: String },
    #[error("invalid percent-encoding \"{text}\" in url")]
    Decode { text: String },
    #[error("unexpected trailing characters \"{rest}\" in url \"{url}\"")]
    TrailingCharacters { rest: String, url: String },
}

/// Bidirectional text ⇄ tree codec.
pub trait UrlSerializer: Send + Sync {
    /// Parse a URL string into a structured tree.
    fn parse(&self, url: &str) -> Result<UrlTree, ParseError>;

    /// Serialize a tree back to its textual form.
    fn serialize(&self, tree: &UrlTree) -> String;
}

/// Default codec for the grammar described in the module docs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultUrlSerializer;

impl UrlSerializer for DefaultUrlSerializer {
    fn parse(&self, url: &str) -> Result<UrlTree, ParseError> {
        let mut parser = UrlParser::new(url);
        let root = parser.parse_root_segment()?;
        let query_params = parser.parse_query_params()?;
        let fragment = parser.parse_fragment()?;
        parser.finish()?;
        Ok(UrlTree::new(root, query_params, fragment))
    }

    fn serialize(&self, tree: &UrlTree) -> String {
        let segments = format!("/{}", serialize_segment_group(&tree.root, true));
        let query = serialize_query_params(&tree.query_params);
        let fragment = tree
            .fragment
            .as_deref()
            .map(|f| format!("#{}", encode_uri_component(f)))
            .unwrap_or_default();
        format!("{segments}{query}{fragment}")
    }
}

impl fmt::Display for UrlTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&DefaultUrlSerializer.serialize(self))
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Percent-encode a URI component, leaving `@ : $ ,` unescaped.
///
/// `/ ( ) ? = & ; #` are always escaped so the serializer's structural
/// characters cannot be forged from data.
pub fn encode_uri_component(s: &str) -> String {
    urlencoding::encode(s)
        .replace("%40", "@")
        .replace("%3A", ":")
        .replace("%24", "$")
        .replace("%2C", ",")
}

fn decode(s: &str, _url: &str) -> Result<String, ParseError> {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .map_err(|_| ParseError::Decode {
            text: s.to_string(),
        })
}

/// Query values additionally decode `+` as space.
fn decode_query(s: &str, url: &str) -> Result<String, ParseError> {
    decode(&s.replace('+', " "), url)
}

// ============================================================================
// Serialization
// ============================================================================

fn serialize_path(segment: &UrlSegment) -> String {
    let mut out = encode_uri_component(&segment.path);
    for (key, value) in &segment.parameters {
        out.push(';');
        out.push_str(&encode_uri_component(key));
        out.push('=');
        out.push_str(&encode_uri_component(value));
    }
    out
}

fn serialize_paths(group: &UrlSegmentGroup) -> String {
    group
        .segments
        .iter()
        .map(serialize_path)
        .collect::<Vec<_>>()
        .join("/")
}

/// Children sorted primary-first then by outlet name, for deterministic
/// output.
fn sorted_children(group: &UrlSegmentGroup) -> Vec<(&String, &UrlSegmentGroup)> {
    let mut children: Vec<_> = group.children.iter().collect();
    children.sort_by_key(|(outlet, _)| (outlet.as_str() != PRIMARY_OUTLET, outlet.to_string()));
    children
}

fn serialize_segment_group(group: &UrlSegmentGroup, root: bool) -> String {
    if group.has_children() && root {
        // Root level: primary child inline, named children grouped.
        let primary = group
            .primary_child()
            .map(|child| serialize_segment_group(child, false))
            .unwrap_or_default();
        let named: Vec<String> = sorted_children(group)
            .into_iter()
            .filter(|(outlet, _)| outlet.as_str() != PRIMARY_OUTLET)
            .map(|(outlet, child)| format!("{outlet}:{}", serialize_segment_group(child, false)))
            .collect();
        if named.is_empty() {
            primary
        } else {
            format!("{primary}({})", named.join("//"))
        }
    } else if group.has_children() {
        let children: Vec<String> = sorted_children(group)
            .into_iter()
            .map(|(outlet, child)| {
                if outlet.as_str() == PRIMARY_OUTLET {
                    serialize_segment_group(child, false)
                } else {
                    format!("{outlet}:{}", serialize_segment_group(child, false))
                }
            })
            .collect();
        // A lone primary child stays inline; any named sibling forces the
        // parenthesized form for the whole child set.
        if group.number_of_children() == 1 && group.primary_child().is_some() {
            format!("{}/{}", serialize_paths(group), children[0])
        } else {
            format!("{}/({})", serialize_paths(group), children.join("//"))
        }
    } else {
        serialize_paths(group)
    }
}

fn serialize_query_params(params: &QueryParams) -> String {
    let mut pairs = Vec::new();
    for (key, value) in params {
        let key = encode_uri_component(key);
        match value {
            QueryValue::Single(v) => pairs.push(format!("{key}={}", encode_uri_component(v))),
            QueryValue::List(vs) => {
                for v in vs {
                    pairs.push(format!("{key}={}", encode_uri_component(v)));
                }
            }
        }
    }
    if pairs.is_empty() {
        String::new()
    } else {
        format!("?{}", pairs.join("&"))
    }
}

// ============================================================================
// Parsing
// ============================================================================

const SEGMENT_TERMINATORS: &[char] = &['/', '(', ')', '?', ';', '#'];
const MATRIX_KEY_TERMINATORS: &[char] = &['/', '(', ')', '?', ';', '=', '#'];
const QUERY_KEY_TERMINATORS: &[char] = &['=', '?', '&', '#'];
const QUERY_VALUE_TERMINATORS: &[char] = &['&', '#'];

/// Single left-to-right cursor over the unparsed remainder of the URL.
struct UrlParser<'a> {
    url: &'a str,
    remaining: &'a str,
}

impl<'a> UrlParser<'a> {
    fn new(url: &'a str) -> Self {
        Self {
            url,
            remaining: url,
        }
    }

    fn peek_starts_with(&self, literal: &str) -> bool {
        self.remaining.starts_with(literal)
    }

    fn consume_optional(&mut self, literal: &str) -> bool {
        if let Some(rest) = self.remaining.strip_prefix(literal) {
            self.remaining = rest;
            true
        } else {
            false
        }
    }

    fn capture(&mut self, literal: &str) -> Result<(), ParseError> {
        if self.consume_optional(literal) {
            Ok(())
        } else {
            Err(ParseError::ExpectedLiteral {
                expected: literal.to_string(),
                url: self.url.to_string(),
            })
        }
    }

    /// Longest prefix containing none of the terminator characters.
    fn match_until(&self, terminators: &[char]) -> &'a str {
        match self.remaining.find(|c| terminators.contains(&c)) {
            Some(idx) => &self.remaining[..idx],
            None => self.remaining,
        }
    }

    fn parse_root_segment(&mut self) -> Result<UrlSegmentGroup, ParseError> {
        self.consume_optional("/");
        if self.remaining.is_empty()
            || self.peek_starts_with("?")
            || self.peek_starts_with("#")
        {
            return Ok(UrlSegmentGroup::default());
        }
        // The root group never carries segments itself.
        Ok(UrlSegmentGroup::new(vec![], self.parse_children()?))
    }

    fn parse_children(&mut self) -> Result<HashMap<String, UrlSegmentGroup>, ParseError> {
        if self.remaining.is_empty() {
            return Ok(HashMap::new());
        }
        self.consume_optional("/");

        let mut segments = Vec::new();
        if !self.peek_starts_with("(") {
            segments.push(self.parse_segment()?);
        }
        while self.peek_starts_with("/")
            && !self.peek_starts_with("//")
            && !self.peek_starts_with("/(")
        {
            self.capture("/")?;
            segments.push(self.parse_segment()?);
        }

        let mut children = HashMap::new();
        if self.peek_starts_with("/(") {
            self.capture("/")?;
            children = self.parse_parens(true)?;
        }

        let mut res = HashMap::new();
        if self.peek_starts_with("(") {
            res = self.parse_parens(false)?;
        }
        if !segments.is_empty() || !children.is_empty() {
            res.insert(
                PRIMARY_OUTLET.to_string(),
                UrlSegmentGroup::new(segments, children),
            );
        }
        Ok(res)
    }

    fn parse_segment(&mut self) -> Result<UrlSegment, ParseError> {
        let path = self.match_until(SEGMENT_TERMINATORS);
        if path.is_empty() && self.peek_starts_with(";") {
            return Err(ParseError::EmptyPathMatrixParams {
                url: self.url.to_string(),
            });
        }
        let path = path.to_string();
        self.capture(&path)?;
        let decoded = decode(&path, self.url)?;
        let mut segment = UrlSegment::new(decoded);
        self.parse_matrix_params(&mut segment)?;
        Ok(segment)
    }

    fn parse_matrix_params(&mut self, segment: &mut UrlSegment) -> Result<(), ParseError> {
        while self.consume_optional(";") {
            let key = self.match_until(MATRIX_KEY_TERMINATORS).to_string();
            if key.is_empty() {
                break;
            }
            self.capture(&key)?;
            let mut value = String::new();
            if self.consume_optional("=") {
                let matched = self.match_until(SEGMENT_TERMINATORS).to_string();
                self.capture(&matched)?;
                value = matched;
            }
            segment
                .parameters
                .insert(decode(&key, self.url)?, decode(&value, self.url)?);
        }
        Ok(())
    }

    fn parse_parens(
        &mut self,
        allow_primary: bool,
    ) -> Result<HashMap<String, UrlSegmentGroup>, ParseError> {
        self.capture("(")?;
        let mut groups = HashMap::new();
        while !self.consume_optional(")") {
            if self.remaining.is_empty() {
                return Err(ParseError::UnbalancedGroup {
                    url: self.url.to_string(),
                });
            }
            let path = self.match_until(SEGMENT_TERMINATORS);
            let next = self.remaining[path.len()..].chars().next();
            if !matches!(next, Some('/') | Some(')') | Some(';')) {
                return Err(ParseError::UnexpectedGroupCharacter {
                    url: self.url.to_string(),
                });
            }

            let outlet_name = if let Some(idx) = path.find(':') {
                let outlet = path[..idx].to_string();
                self.capture(&outlet)?;
                self.capture(":")?;
                outlet
            } else if allow_primary {
                PRIMARY_OUTLET.to_string()
            } else {
                return Err(ParseError::MissingOutletName {
                    url: self.url.to_string(),
                });
            };

            let mut children = self.parse_children()?;
            let group = if children.len() == 1 {
                match children.remove(PRIMARY_OUTLET) {
                    Some(only) => only,
                    None => UrlSegmentGroup::new(vec![], children),
                }
            } else {
                UrlSegmentGroup::new(vec![], children)
            };
            groups.insert(outlet_name, group);
            self.consume_optional("//");
        }
        Ok(groups)
    }

    fn parse_query_params(&mut self) -> Result<QueryParams, ParseError> {
        let mut params = QueryParams::new();
        if self.consume_optional("?") {
            loop {
                self.parse_query_param(&mut params)?;
                if !self.consume_optional("&") {
                    break;
                }
            }
        }
        Ok(params)
    }

    fn parse_query_param(&mut self, params: &mut QueryParams) -> Result<(), ParseError> {
        let key = self.match_until(QUERY_KEY_TERMINATORS).to_string();
        if key.is_empty() {
            return Ok(());
        }
        self.capture(&key)?;
        let mut value = String::new();
        if self.consume_optional("=") {
            let matched = self.match_until(QUERY_VALUE_TERMINATORS).to_string();
            self.capture(&matched)?;
            value = matched;
        }
        let decoded_key = decode_query(&key, self.url)?;
        let decoded_value = decode_query(&value, self.url)?;
        match params.get_mut(&decoded_key) {
            // Repeated keys accumulate into a list.
            Some(existing) => existing.push(decoded_value),
            None => {
                params.insert(decoded_key, QueryValue::Single(decoded_value));
            }
        }
        Ok(())
    }

    fn parse_fragment(&mut self) -> Result<Option<String>, ParseError> {
        if self.consume_optional("#") {
            let rest = self.remaining;
            self.remaining = "";
            return Ok(Some(decode(rest, self.url)?));
        }
        Ok(None)
    }

    fn finish(&self) -> Result<(), ParseError> {
        if self.remaining.is_empty() {
            Ok(())
        } else {
            Err(ParseError::TrailingCharacters {
                rest: self.remaining.to_string(),
                url: self.url.to_string(),
            })
        }
    }
}
