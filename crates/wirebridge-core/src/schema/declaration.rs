//! Column declaration grammar
//!
//! ```text
//! declaration := name type [DEFAULT literal]
//! name        := `quoted``name` | bare_name
//! type        := Nullable(type) | ident [ '(' args ')' ]
//! literal     := 'quoted \' string' | token
//! ```
//!
//! Scanning skips nested parentheses and quoted sections so commas and
//! keywords inside type arguments or literals are never mistaken for
//! boundaries.

use wirebridge_common::{BridgeError, Result};

/// Parsed type expression, arguments kept as raw trimmed text
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TypeExpr {
    pub name: String,
    pub args: Vec<String>,
    pub nullable: bool,
}

/// Default literal as written in a declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Literal {
    /// Single-quoted string, escapes resolved
    Quoted(String),
    /// Bare token such as `42` or `-1.5`
    Raw(String),
}

impl Literal {
    pub fn text(&self) -> &str {
        match self {
            Literal::Quoted(s) | Literal::Raw(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Declaration {
    pub name: String,
    pub ty: TypeExpr,
    pub default: Option<Literal>,
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn error(&self, message: impl Into<String>) -> BridgeError {
        BridgeError::schema(message, self.src)
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn name(&mut self) -> Result<String> {
        match self.peek() {
            Some('`') => {
                let end = skip_quoted(self.src.as_bytes(), self.pos)
                    .ok_or_else(|| self.error("unterminated quoted column name"))?;
                let inner = &self.src[self.pos + 1..end - 1];
                self.pos = end;
                Ok(inner.replace("``", "`"))
            }
            Some(_) => {
                let len = self
                    .rest()
                    .find(char::is_whitespace)
                    .unwrap_or(self.rest().len());
                let name = &self.rest()[..len];
                self.pos += len;
                Ok(name.to_string())
            }
            None => Err(self.error("missing column name")),
        }
    }

    fn ident(&mut self) -> &'a str {
        let len = self
            .rest()
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(self.rest().len());
        let ident = &self.rest()[..len];
        self.pos += len;
        ident
    }

    /// Content between a `(` at the cursor and its matching `)`
    fn group(&mut self) -> Result<&'a str> {
        let bytes = self.src.as_bytes();
        let open = self.pos;
        let mut depth = 0usize;
        let mut i = open;
        while i < bytes.len() {
            match bytes[i] {
                b'\'' | b'`' | b'"' => {
                    i = skip_quoted(bytes, i).ok_or_else(|| self.error("unterminated quote"))?;
                    continue;
                }
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        self.pos = i + 1;
                        return Ok(&self.src[open + 1..i]);
                    }
                }
                _ => {}
            }
            i += 1;
        }
        Err(self.error("unbalanced parentheses"))
    }

    fn type_expr(&mut self) -> Result<TypeExpr> {
        let name = self.ident();
        if name.is_empty() {
            return Err(self.error("missing column type"));
        }
        self.skip_ws();
        let args = if self.peek() == Some('(') {
            self.group()?
        } else {
            ""
        };

        if name.eq_ignore_ascii_case("Nullable") {
            let mut inner = parse_type_expr(args).map_err(|_| self.error("invalid Nullable type"))?;
            inner.nullable = true;
            return Ok(inner);
        }

        let args = split_top_level(args, ',')
            .map_err(|_| self.error("invalid type arguments"))?
            .into_iter()
            .map(str::to_string)
            .collect();
        Ok(TypeExpr {
            name: name.to_string(),
            args,
            nullable: false,
        })
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let rest = self.rest();
        let matches = rest
            .get(..keyword.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(keyword))
            && rest
                .get(keyword.len()..)
                .and_then(|tail| tail.chars().next())
                .map_or(true, char::is_whitespace);
        if matches {
            self.pos += keyword.len();
        }
        matches
    }

    fn literal(&mut self) -> Result<Literal> {
        if self.peek() == Some('\'') {
            let end = skip_quoted(self.src.as_bytes(), self.pos)
                .ok_or_else(|| self.error("unterminated string literal"))?;
            let value = unescape(&self.src[self.pos + 1..end - 1]);
            self.pos = end;
            return Ok(Literal::Quoted(value));
        }
        let token = self.rest().trim_end();
        if token.is_empty() {
            return Err(self.error("missing DEFAULT value"));
        }
        self.pos = self.src.len();
        Ok(Literal::Raw(token.to_string()))
    }
}

/// Parse `name Type [DEFAULT literal]`
pub(crate) fn parse_declaration(text: &str) -> Result<Declaration> {
    let mut cur = Cursor::new(text);
    cur.skip_ws();
    let name = cur.name()?;
    cur.skip_ws();
    let ty = cur.type_expr()?;
    cur.skip_ws();
    let default = if cur.eat_keyword("DEFAULT") {
        cur.skip_ws();
        Some(cur.literal()?)
    } else {
        None
    };
    cur.skip_ws();
    if !cur.at_end() {
        return Err(cur.error(format!("unexpected input '{}'", cur.rest())));
    }
    Ok(Declaration { name, ty, default })
}

/// Parse a standalone type expression such as `Nullable(Decimal(10, 2))`
pub(crate) fn parse_type_expr(text: &str) -> Result<TypeExpr> {
    let mut cur = Cursor::new(text);
    cur.skip_ws();
    let ty = cur.type_expr()?;
    cur.skip_ws();
    if !cur.at_end() {
        return Err(cur.error(format!("unexpected input '{}'", cur.rest())));
    }
    Ok(ty)
}

/// Split on `sep` outside parentheses and quotes. Pieces are trimmed, empty ones dropped.
pub(crate) fn split_top_level(text: &str, sep: char) -> Result<Vec<&str>> {
    let bytes = text.as_bytes();
    let sep = sep as u8;
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'`' | b'"' => {
                i = skip_quoted(bytes, i)
                    .ok_or_else(|| BridgeError::schema("unterminated quote", text))?;
                continue;
            }
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(BridgeError::schema("unbalanced parentheses", text));
                }
            }
            b if b == sep && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if depth != 0 {
        return Err(BridgeError::schema("unbalanced parentheses", text));
    }
    parts.push(&text[start..]);
    Ok(parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect())
}

/// Index just past the quoted section opening at `start`.
/// A doubled quote is an escaped quote; backslash escapes apply to `'` and `"`.
fn skip_quoted(bytes: &[u8], start: usize) -> Option<usize> {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' && quote != b'`' {
            i += 2;
            continue;
        }
        if b == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

/// Resolve `\'`, `''`, `\\`, `\n`, `\t`, `\r` and `\0`
fn unescape(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('0') => out.push('\0'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            },
            '\'' if chars.peek() == Some(&'\'') => {
                chars.next();
                out.push('\'');
            }
            c => out.push(c),
        }
    }
    out
}

/// Strip the quotes of a single-quoted literal, or return the text as-is
pub(crate) fn unquote(text: &str) -> String {
    let text = text.trim();
    if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        unescape(&text[1..text.len() - 1])
    } else {
        text.to_string()
    }
}

/// Single-quote a string literal
pub(crate) fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Backtick-quote an identifier, doubling embedded backticks
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_and_quoted_names() {
        let decl = parse_declaration("id UInt64").unwrap();
        assert_eq!(decl.name, "id");
        assert_eq!(decl.ty.name, "UInt64");
        assert!(!decl.ty.nullable);

        let decl = parse_declaration("`a``b c` String").unwrap();
        assert_eq!(decl.name, "a`b c");
    }

    #[test]
    fn test_nullable_with_nested_args() {
        let decl = parse_declaration("`ts` Nullable(DateTime64(3, 'Asia/Tokyo'))").unwrap();
        assert!(decl.ty.nullable);
        assert_eq!(decl.ty.name, "DateTime64");
        assert_eq!(decl.ty.args, vec!["3", "'Asia/Tokyo'"]);
    }

    #[test]
    fn test_enum_args_with_commas_in_names() {
        let decl = parse_declaration("e Enum8('a,b' = 1, 'it''s' = 2, 'x\\'y' = 3)").unwrap();
        assert_eq!(decl.ty.args, vec!["'a,b' = 1", "'it''s' = 2", "'x\\'y' = 3"]);
    }

    #[test]
    fn test_default_keyword_case_insensitive() {
        let decl = parse_declaration("n Int32 default -5").unwrap();
        assert_eq!(decl.default, Some(Literal::Raw("-5".into())));

        let decl = parse_declaration("s String DEFAULT 'it\\'s DEFAULT'").unwrap();
        assert_eq!(decl.default, Some(Literal::Quoted("it's DEFAULT".into())));
    }

    #[test]
    fn test_default_inside_enum_is_not_a_keyword() {
        let decl = parse_declaration("e Enum8('DEFAULT' = 1, 'other' = 2) DEFAULT 'other'").unwrap();
        assert_eq!(decl.ty.args.len(), 2);
        assert_eq!(decl.default, Some(Literal::Quoted("other".into())));
    }

    #[test]
    fn test_malformed_declarations() {
        for bad in [
            "",
            "name",
            "name Decimal(10, 2",
            "`open String",
            "s String DEFAULT 'unterminated",
            "s String garbage",
            "s String DEFAULT",
        ] {
            let err = parse_declaration(bad).unwrap_err();
            assert_eq!(err.code(), "SCHEMA_PARSE_ERROR", "{:?}", bad);
        }
    }

    #[test]
    fn test_non_ascii_after_type() {
        for bad in ["s String ééééé", "s String é", "n Int32 DEFAULé 1"] {
            let err = parse_declaration(bad).unwrap_err();
            assert_eq!(err.code(), "SCHEMA_PARSE_ERROR", "{:?}", bad);
        }

        let decl = parse_declaration("`名前` String DEFAULT 'ünïcödé'").unwrap();
        assert_eq!(decl.name, "名前");
        assert_eq!(decl.default, Some(Literal::Quoted("ünïcödé".into())));

        let decl = parse_declaration("s String DEFAULT ñ").unwrap();
        assert_eq!(decl.default, Some(Literal::Raw("ñ".into())));
    }

    #[test]
    fn test_split_top_level() {
        let parts = split_top_level("a Int32, b Decimal(10, 2), `c,d` String, e Enum('x,y' = 1)", ',').unwrap();
        assert_eq!(
            parts,
            vec!["a Int32", "b Decimal(10, 2)", "`c,d` String", "e Enum('x,y' = 1)"]
        );
        assert!(split_top_level("a Decimal(1,", ',').is_err());
        assert!(split_top_level("a String)", ',').is_err());
    }

    #[test]
    fn test_quote_round_trip() {
        let raw = "it's a \\ test\nline\ttab";
        let quoted = quote_literal(raw);
        assert_eq!(unquote(&quoted), raw);
        assert_eq!(quote_identifier("a`b"), "`a``b`");
    }
}
