//! Tolerant XML-ish tokenizer for model output.
//!
//! Re-scans the whole buffer from the start on every parse; it carries no
//! state between calls. Anything between angle brackets that does not lex
//! as a tag is handed back as literal text, and a buffer that stops
//! mid-construct yields a single trailing `Incomplete` token instead of an
//! error. Entity decoding covers exactly the five predefined entities;
//! unknown entities pass through untouched.

use std::borrow::Cow;
use std::collections::VecDeque;

use once_cell::sync::Lazy;
use regex::Regex;

/// Grammar for tag and attribute names.
pub(crate) static TAG_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").unwrap());

/// Which construct the buffer stopped in the middle of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Construct {
    OpenTag,
    CloseTag,
    Text,
    Comment,
    CData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    OpenTagStart,
    TagName(&'a str),
    AttrName(&'a str),
    AttrValue(Cow<'a, str>),
    TagEnd,
    SelfClosing,
    Text(Cow<'a, str>),
    CloseTag(&'a str),
    Eof,
    /// Emitted in place of the final token when the buffer ends inside a
    /// construct, carrying the partial lexeme collected so far. Never
    /// appears anywhere but at the very end of the stream.
    Incomplete {
        construct: Construct,
        lexeme: &'a str,
    },
}

pub struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
    queue: VecDeque<Token<'a>>,
    finished: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            queue: VecDeque::new(),
            finished: false,
        }
    }

    fn scan(&mut self) {
        let src = self.src;
        loop {
            if self.pos >= src.len() {
                self.finished = true;
                self.queue.push_back(Token::Eof);
                return;
            }
            let rest = &src[self.pos..];
            match rest.find('<') {
                None => {
                    // a text run is only terminated by '<'; the buffer may
                    // still be growing under it
                    self.pos = src.len();
                    self.finished = true;
                    self.queue.push_back(Token::Incomplete {
                        construct: Construct::Text,
                        lexeme: rest,
                    });
                    return;
                }
                Some(0) => {
                    if self.lex_angle() {
                        return;
                    }
                    // completed comment: no token, keep scanning
                }
                Some(off) => {
                    self.pos += off;
                    self.queue.push_back(Token::Text(decode_entities(&rest[..off])));
                    return;
                }
            }
        }
    }

    /// Lex the construct starting at the `<` at `self.pos`. Returns false
    /// when the construct was consumed without producing a token.
    fn lex_angle(&mut self) -> bool {
        let src = self.src;
        let rest = &src[self.pos..];

        if let Some(tail) = rest.strip_prefix("<!--") {
            return match tail.find("-->") {
                Some(i) => {
                    self.pos += 4 + i + 3;
                    false
                }
                None => {
                    self.pos = src.len();
                    self.finished = true;
                    self.queue.push_back(Token::Incomplete {
                        construct: Construct::Comment,
                        lexeme: tail,
                    });
                    true
                }
            };
        }

        if let Some(tail) = rest.strip_prefix("<![CDATA[") {
            return match tail.find("]]>") {
                Some(i) => {
                    // CDATA payload is verbatim: no entity decoding
                    self.queue.push_back(Token::Text(Cow::Borrowed(&tail[..i])));
                    self.pos += 9 + i + 3;
                    true
                }
                None => {
                    self.pos = src.len();
                    self.finished = true;
                    self.queue.push_back(Token::Incomplete {
                        construct: Construct::CData,
                        lexeme: tail,
                    });
                    true
                }
            };
        }

        // the buffer may stop inside one of the special openers
        if rest.len() > 1 && ("<!--".starts_with(rest) || "<![CDATA[".starts_with(rest)) {
            let construct = if "<!--".starts_with(rest) {
                Construct::Comment
            } else {
                Construct::CData
            };
            self.pos = src.len();
            self.finished = true;
            self.queue.push_back(Token::Incomplete {
                construct,
                lexeme: "",
            });
            return true;
        }

        if let Some(tail) = rest.strip_prefix("</") {
            return match tail.find('>') {
                Some(i) => {
                    let name = tail[..i].trim();
                    if TAG_NAME_RE.is_match(name) {
                        self.pos += 2 + i + 1;
                        self.queue.push_back(Token::CloseTag(name));
                    } else {
                        // not a closing tag after all; hand the bracket
                        // back as prose and rescan what follows it
                        self.pos += 1;
                        self.queue.push_back(Token::Text(Cow::Borrowed("<")));
                    }
                    true
                }
                None => {
                    let name = tail.trim();
                    if name.is_empty() || TAG_NAME_RE.is_match(name) {
                        self.pos = src.len();
                        self.finished = true;
                        self.queue.push_back(Token::Incomplete {
                            construct: Construct::CloseTag,
                            lexeme: name,
                        });
                    } else {
                        self.pos += 1;
                        self.queue.push_back(Token::Text(Cow::Borrowed("<")));
                    }
                    true
                }
            };
        }

        let bytes = rest.as_bytes();
        if bytes.len() == 1 {
            // lone '<' at the very end of the buffer
            self.pos = src.len();
            self.finished = true;
            self.queue.push_back(Token::OpenTagStart);
            self.queue.push_back(Token::Incomplete {
                construct: Construct::OpenTag,
                lexeme: "",
            });
            return true;
        }
        if !is_name_start(bytes[1]) {
            // stray '<' in prose
            self.pos += 1;
            self.queue.push_back(Token::Text(Cow::Borrowed("<")));
            return true;
        }
        self.lex_open_tag()
    }

    fn lex_open_tag(&mut self) -> bool {
        let src = self.src;
        let rest = &src[self.pos..];
        let bytes = rest.as_bytes();
        let mut toks: Vec<Token<'_>> = vec![Token::OpenTagStart];

        let mut i = 1;
        while i < bytes.len() && is_name_char(bytes[i]) {
            i += 1;
        }
        if i == bytes.len() {
            // buffer stops inside the tag name
            toks.push(Token::Incomplete {
                construct: Construct::OpenTag,
                lexeme: &rest[1..],
            });
            return self.commit_truncated(toks);
        }
        toks.push(Token::TagName(&rest[1..i]));

        loop {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= bytes.len() {
                // mid-tag, between attributes
                toks.push(Token::Incomplete {
                    construct: Construct::OpenTag,
                    lexeme: "",
                });
                return self.commit_truncated(toks);
            }
            match bytes[i] {
                b'>' => {
                    toks.push(Token::TagEnd);
                    i += 1;
                    break;
                }
                b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'>' => {
                    toks.push(Token::SelfClosing);
                    i += 2;
                    break;
                }
                b'/' if i + 1 == bytes.len() => {
                    toks.push(Token::Incomplete {
                        construct: Construct::OpenTag,
                        lexeme: "/",
                    });
                    return self.commit_truncated(toks);
                }
                b if is_name_start(b) => {
                    let a_start = i;
                    while i < bytes.len() && is_name_char(bytes[i]) {
                        i += 1;
                    }
                    toks.push(Token::AttrName(&rest[a_start..i]));
                    if i >= bytes.len() {
                        toks.push(Token::Incomplete {
                            construct: Construct::OpenTag,
                            lexeme: &rest[a_start..],
                        });
                        return self.commit_truncated(toks);
                    }
                    if bytes[i] == b'=' {
                        i += 1;
                        if i >= bytes.len() {
                            toks.push(Token::Incomplete {
                                construct: Construct::OpenTag,
                                lexeme: &rest[a_start..],
                            });
                            return self.commit_truncated(toks);
                        }
                        match bytes[i] {
                            q @ (b'"' | b'\'') => {
                                let v_start = i + 1;
                                match rest[v_start..].find(q as char) {
                                    Some(off) => {
                                        toks.push(Token::AttrValue(decode_entities(
                                            &rest[v_start..v_start + off],
                                        )));
                                        i = v_start + off + 1;
                                    }
                                    None => {
                                        toks.push(Token::Incomplete {
                                            construct: Construct::OpenTag,
                                            lexeme: &rest[v_start..],
                                        });
                                        return self.commit_truncated(toks);
                                    }
                                }
                            }
                            _ => {
                                let v_start = i;
                                while i < bytes.len() {
                                    let b = bytes[i];
                                    if b.is_ascii_whitespace() || b == b'>' || b == b'<' {
                                        break;
                                    }
                                    if b == b'/' && bytes.get(i + 1) == Some(&b'>') {
                                        break;
                                    }
                                    i += 1;
                                }
                                if v_start == i {
                                    // "=<" or "=>" with nothing in between
                                    return self.abandon_tag(i);
                                }
                                toks.push(Token::AttrValue(Cow::Borrowed(&rest[v_start..i])));
                                if i < bytes.len() && bytes[i] == b'<' {
                                    return self.abandon_tag(i);
                                }
                                if i >= bytes.len() {
                                    toks.push(Token::Incomplete {
                                        construct: Construct::OpenTag,
                                        lexeme: "",
                                    });
                                    return self.commit_truncated(toks);
                                }
                            }
                        }
                    }
                    // bare attribute without a value: loop continues
                }
                _ => {
                    // not a tag after all
                    return self.abandon_tag(i);
                }
            }
        }
        self.pos += i;
        self.queue.extend(toks);
        true
    }

    /// The angle span stopped looking like a tag at byte `upto`: emit the
    /// scanned prefix as prose and resume at the offending character, so a
    /// nested real tag is still seen.
    fn abandon_tag(&mut self, upto: usize) -> bool {
        let src = self.src;
        let rest = &src[self.pos..];
        self.pos += upto;
        self.queue.push_back(Token::Text(decode_entities(&rest[..upto])));
        true
    }

    fn commit_truncated(&mut self, toks: Vec<Token<'a>>) -> bool {
        self.pos = self.src.len();
        self.finished = true;
        self.queue.extend(toks);
        true
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        loop {
            if let Some(t) = self.queue.pop_front() {
                return Some(t);
            }
            if self.finished {
                return None;
            }
            self.scan();
        }
    }
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Decode the five predefined entities; anything else passes through.
pub(crate) fn decode_entities(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(i) = rest.find('&') {
        out.push_str(&rest[..i]);
        rest = &rest[i..];
        match rest[1..].find(';').map(|j| j + 1) {
            Some(j) if j <= 6 => {
                match &rest[1..j] {
                    "amp" => out.push('&'),
                    "lt" => out.push('<'),
                    "gt" => out.push('>'),
                    "quot" => out.push('"'),
                    "apos" => out.push('\''),
                    _ => out.push_str(&rest[..=j]),
                }
                rest = &rest[j + 1..];
            }
            _ => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<Token<'_>> {
        Tokenizer::new(src).collect()
    }

    #[test]
    fn test_simple_element() {
        let toks = lex("<a>hi</a>");
        assert_eq!(
            toks,
            vec![
                Token::OpenTagStart,
                Token::TagName("a"),
                Token::TagEnd,
                Token::Text(Cow::Borrowed("hi")),
                Token::CloseTag("a"),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_attributes() {
        let toks = lex(r#"<a href="x&amp;y" checked flag=1>"#);
        assert_eq!(
            toks,
            vec![
                Token::OpenTagStart,
                Token::TagName("a"),
                Token::AttrName("href"),
                Token::AttrValue(Cow::Owned("x&y".to_string())),
                Token::AttrName("checked"),
                Token::AttrName("flag"),
                Token::AttrValue(Cow::Borrowed("1")),
                Token::TagEnd,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_self_closing() {
        let toks = lex("<movie/>");
        assert_eq!(
            toks,
            vec![
                Token::OpenTagStart,
                Token::TagName("movie"),
                Token::SelfClosing,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_entity_decoding() {
        let toks = lex("<t>a &lt; b &amp; c &unknown; d</t>");
        assert_eq!(
            toks[3],
            Token::Text(Cow::Owned("a < b & c &unknown; d".to_string()))
        );
    }

    #[test]
    fn test_stray_brackets_are_prose() {
        // '< ' is not a tag start, '<3' neither
        let toks = lex("<t>a < b and <3</t>");
        let text: String = toks
            .iter()
            .filter_map(|t| match t {
                Token::Text(s) => Some(s.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "a < b and <3");
        assert!(toks.contains(&Token::CloseTag("t")));
    }

    #[test]
    fn test_truncated_tag_name() {
        let toks = lex("<mov");
        assert_eq!(
            toks,
            vec![
                Token::OpenTagStart,
                Token::Incomplete {
                    construct: Construct::OpenTag,
                    lexeme: "mov"
                },
            ]
        );
    }

    #[test]
    fn test_truncated_close_tag() {
        let toks = lex("<t>x</ti");
        assert_eq!(
            toks.last(),
            Some(&Token::Incomplete {
                construct: Construct::CloseTag,
                lexeme: "ti"
            })
        );
    }

    #[test]
    fn test_trailing_text_is_incomplete() {
        let toks = lex("<t>The Wach");
        assert_eq!(
            toks.last(),
            Some(&Token::Incomplete {
                construct: Construct::Text,
                lexeme: "The Wach"
            })
        );
    }

    #[test]
    fn test_lone_open_bracket() {
        let toks = lex("<t>x</t><");
        assert_eq!(
            toks.last(),
            Some(&Token::Incomplete {
                construct: Construct::OpenTag,
                lexeme: ""
            })
        );
    }

    #[test]
    fn test_cdata_verbatim() {
        let toks = lex("<c><![CDATA[if (a < b) { x &amp; y }]]></c>");
        assert_eq!(
            toks[3],
            Token::Text(Cow::Borrowed("if (a < b) { x &amp; y }"))
        );
    }

    #[test]
    fn test_unterminated_cdata() {
        let toks = lex("<c><![CDATA[let x = 1;");
        assert_eq!(
            toks.last(),
            Some(&Token::Incomplete {
                construct: Construct::CData,
                lexeme: "let x = 1;"
            })
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let toks = lex("<t><!-- note -->x</t>");
        assert_eq!(
            toks,
            vec![
                Token::OpenTagStart,
                Token::TagName("t"),
                Token::TagEnd,
                Token::Text(Cow::Borrowed("x")),
                Token::CloseTag("t"),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_attribute_value() {
        let toks = lex(r#"<a href="hal"#);
        assert_eq!(
            toks.last(),
            Some(&Token::Incomplete {
                construct: Construct::OpenTag,
                lexeme: "hal"
            })
        );
    }

    #[test]
    fn test_invalid_tag_body_falls_back_to_text() {
        // "<a ,b>" is not a tag; the prefix is prose, rescan continues
        let toks = lex("<a ,b>");
        assert_eq!(toks[0], Token::Text(Cow::Borrowed("<a ")));
    }

    #[test]
    fn test_incomplete_is_always_last() {
        for src in ["<a>x", "<a>x<", "<a>x</", "<a>x</a", "<a", "<a b", "x &a"] {
            let toks = lex(src);
            for (i, t) in toks.iter().enumerate() {
                if matches!(t, Token::Incomplete { .. }) {
                    assert_eq!(i, toks.len() - 1, "Incomplete not last in {:?}", src);
                }
            }
        }
    }
}
