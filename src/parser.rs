//! Recursive-descent assembler: consumes the token stream against a
//! descriptor tree and builds the in-progress value for one parse call.
//!
//! Everything malformed about the *input* is tolerated here — unknown tags
//! are skipped with their subtree, missing closers close implicitly when a
//! structural tag of an enclosing level shows up, stray closers and angle
//! brackets become prose. Only Final-mode finalization can fail, and only
//! on schema-level conditions (coercion, required fields, unresolved
//! unions).

use std::borrow::Cow;
use std::collections::HashMap;

use log::{debug, trace};

use crate::error::ParseError;
use crate::schema::{Descriptor, DescriptorKind, FieldDef, ObjectSchema, ScalarType};
use crate::value::{FieldState, ObjectValue, Parsed, UnionValue, Value};
use crate::xml_tok::{decode_entities, Construct, Token, Tokenizer};
use crate::Mode;

pub(crate) fn run(desc: &Descriptor, text: &str, mode: Mode) -> Result<Parsed, ParseError> {
    let mut parser = Parser {
        cur: Cursor::new(text),
        path: Vec::new(),
        open_path: None,
    };
    let eff = desc.effective();
    let node = match &eff.kind {
        DescriptorKind::Object(schema) => ParseNode::Object(parser.parse_object(eff, schema, &[])),
        _ => parser.parse_value(eff, &[]),
    };
    let value = node.finalize(desc, true, mode)?;
    Ok(Parsed {
        value,
        open_path: match mode {
            Mode::Partial => parser.open_path,
            Mode::Final => None,
        },
    })
}

/* ------------------------------------------------------------------ */
/*  Event view of the token stream                                    */
/* ------------------------------------------------------------------ */

/// Folded view: the parser only cares about whole tags and text runs.
/// Attributes are lexed and dropped; a truncated open/close tag ends the
/// stream without contributing text, while truncated text/CDATA still
/// carries its partial lexeme.
#[derive(Debug, Clone, PartialEq)]
enum Event<'a> {
    Open(&'a str),
    SelfClose(&'a str),
    Close(&'a str),
    Text(Cow<'a, str>),
    TrailingText(Cow<'a, str>),
    End,
}

struct Cursor<'a> {
    tok: Tokenizer<'a>,
    pending: Option<Event<'a>>,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            tok: Tokenizer::new(text),
            pending: None,
        }
    }

    fn next_event(&mut self) -> Event<'a> {
        self.pending.take().unwrap_or_else(|| self.pull())
    }

    /// Leave an event for the enclosing level to consume.
    fn put_back(&mut self, ev: Event<'a>) {
        debug_assert!(self.pending.is_none());
        self.pending = Some(ev);
    }

    fn pull(&mut self) -> Event<'a> {
        loop {
            match self.tok.next() {
                None | Some(Token::Eof) => return Event::End,
                Some(Token::Text(t)) => return Event::Text(t),
                Some(Token::CloseTag(n)) => return Event::Close(n),
                Some(Token::OpenTagStart) => {
                    let mut name: Option<&'a str> = None;
                    loop {
                        match self.tok.next() {
                            Some(Token::TagName(n)) => name = Some(n),
                            Some(Token::AttrName(a)) => trace!("dropping attribute {:?}", a),
                            Some(Token::AttrValue(_)) => {}
                            Some(Token::TagEnd) => match name {
                                Some(n) => return Event::Open(n),
                                None => break,
                            },
                            Some(Token::SelfClosing) => match name {
                                Some(n) => return Event::SelfClose(n),
                                None => break,
                            },
                            Some(Token::Incomplete { .. }) | Some(Token::Eof) | None => {
                                return Event::End
                            }
                            Some(_) => break,
                        }
                    }
                }
                Some(Token::Incomplete { construct, lexeme }) => {
                    return match construct {
                        Construct::Text => Event::TrailingText(decode_entities(lexeme)),
                        Construct::CData => Event::TrailingText(Cow::Borrowed(lexeme)),
                        _ => Event::End,
                    };
                }
                Some(_) => {}
            }
        }
    }
}

/* ------------------------------------------------------------------ */
/*  ParseNode                                                         */
/* ------------------------------------------------------------------ */

/// Mutable in-progress value for one descriptor position. Shape always
/// matches the descriptor kind it was built against; discarded after the
/// parse call produces its output.
#[derive(Debug)]
enum ParseNode {
    Scalar(ScalarNode),
    Object(ObjectNode),
    List(ListNode),
    Union(UnionNode),
}

#[derive(Debug)]
struct ScalarNode {
    raw: String,
}

#[derive(Debug, Default)]
struct ObjectNode {
    fields: HashMap<String, ParseNode>,
}

#[derive(Debug)]
struct ListNode {
    items: Vec<ParseNode>,
}

#[derive(Debug)]
struct UnionNode {
    branch: Option<(String, Box<ParseNode>)>,
}

/// Node for a tag that opened and closed in one token (`<movie/>`).
fn empty_node(desc: &Descriptor) -> ParseNode {
    match &desc.effective().kind {
        DescriptorKind::Scalar(_) => ParseNode::Scalar(ScalarNode { raw: String::new() }),
        DescriptorKind::Object(_) => ParseNode::Object(ObjectNode::default()),
        DescriptorKind::List(_) => ParseNode::List(ListNode { items: Vec::new() }),
        DescriptorKind::Union(_) => ParseNode::Union(UnionNode { branch: None }),
        DescriptorKind::Optional(_) => unreachable!("effective() strips Optional"),
    }
}

fn in_stops(stops: &[&str], tag: &str) -> bool {
    stops.iter().any(|s| *s == tag)
}

/// Tags that are structural at this object's level: its own close, its
/// field tags, and the alternative tags of any union-kinded field.
fn object_local_tags<'d>(desc: &'d Descriptor, schema: &'d ObjectSchema) -> Vec<&'d str> {
    let mut tags = vec![desc.name.as_str()];
    for f in &schema.fields {
        tags.push(f.descriptor.name.as_str());
        if let DescriptorKind::Union(alts) = &f.descriptor.effective().kind {
            tags.extend(alts.iter().map(|a| a.name.as_str()));
        }
    }
    tags
}

/// A tag matching a union-kinded field's alternative resolves that union
/// directly, with no wrapper tag in the input.
fn union_route<'d>(schema: &'d ObjectSchema, tag: &str) -> Option<(&'d FieldDef, &'d Descriptor)> {
    for f in &schema.fields {
        if let DescriptorKind::Union(alts) = &f.descriptor.effective().kind {
            if let Some(alt) = alts.iter().find(|a| a.name == tag) {
                return Some((f, alt));
            }
        }
    }
    None
}

/* ------------------------------------------------------------------ */
/*  Parser                                                            */
/* ------------------------------------------------------------------ */

struct Parser<'a> {
    cur: Cursor<'a>,
    path: Vec<String>,
    open_path: Option<String>,
}

impl<'a> Parser<'a> {
    /// Record the deepest construct still open when the input ran out.
    /// The innermost active parse sees `End` first, so first write wins.
    fn mark_open(&mut self) {
        if self.open_path.is_none() && !self.path.is_empty() {
            self.open_path = Some(join_path(&self.path));
        }
    }

    fn parse_value<'d>(&mut self, desc: &'d Descriptor, stops: &[&'d str]) -> ParseNode {
        let eff = desc.effective();
        match &eff.kind {
            DescriptorKind::Scalar(_) => ParseNode::Scalar(self.parse_scalar(eff, stops)),
            DescriptorKind::Object(schema) => {
                ParseNode::Object(self.parse_object(eff, schema, stops))
            }
            DescriptorKind::List(elem) => ParseNode::List(self.parse_list(eff, elem, stops)),
            DescriptorKind::Union(alts) => ParseNode::Union(self.parse_union(eff, alts, stops)),
            DescriptorKind::Optional(_) => unreachable!("effective() strips Optional"),
        }
    }

    /// Accumulate text until our own closing tag. Markup that belongs to
    /// nobody goes back into the text literally, so code-bearing fields
    /// keep their inline tags.
    fn parse_scalar(&mut self, desc: &Descriptor, stops: &[&str]) -> ScalarNode {
        let mut raw = String::new();
        loop {
            match self.cur.next_event() {
                Event::Text(t) | Event::TrailingText(t) => raw.push_str(&t),
                Event::Close(n) if n == desc.name => {
                    return ScalarNode { raw };
                }
                Event::Close(n) if in_stops(stops, n) => {
                    self.cur.put_back(Event::Close(n));
                    return ScalarNode { raw };
                }
                Event::Close(n) => {
                    raw.push_str("</");
                    raw.push_str(n);
                    raw.push('>');
                }
                Event::Open(n) if in_stops(stops, n) => {
                    self.cur.put_back(Event::Open(n));
                    return ScalarNode { raw };
                }
                Event::Open(n) => {
                    raw.push('<');
                    raw.push_str(n);
                    raw.push('>');
                }
                Event::SelfClose(n) if in_stops(stops, n) => {
                    self.cur.put_back(Event::SelfClose(n));
                    return ScalarNode { raw };
                }
                Event::SelfClose(n) => {
                    raw.push('<');
                    raw.push_str(n);
                    raw.push_str("/>");
                }
                Event::End => {
                    self.mark_open();
                    return ScalarNode { raw };
                }
            }
        }
    }

    fn parse_object<'d>(
        &mut self,
        desc: &'d Descriptor,
        schema: &'d ObjectSchema,
        stops: &[&'d str],
    ) -> ObjectNode {
        let mut node = ObjectNode::default();
        let mut child_stops: Vec<&'d str> = stops.to_vec();
        child_stops.extend(object_local_tags(desc, schema));

        loop {
            match self.cur.next_event() {
                Event::Text(_) | Event::TrailingText(_) => {}
                Event::Close(n) if n == desc.name => return node,
                Event::Close(n) if in_stops(stops, n) => {
                    self.cur.put_back(Event::Close(n));
                    return node;
                }
                Event::Close(n) => trace!("ignoring stray closing tag </{}>", n),
                ev @ (Event::Open(_) | Event::SelfClose(_)) => {
                    let n = match &ev {
                        Event::Open(n) | Event::SelfClose(n) => *n,
                        _ => unreachable!(),
                    };
                    let selfclose = matches!(&ev, Event::SelfClose(_));

                    if let Some(fd) = schema.fields.iter().find(|f| f.descriptor.name == n) {
                        if node.fields.contains_key(n) {
                            // first occurrence wins; later duplicates must
                            // not disturb already-resolved values
                            debug!("ignoring duplicate <{}> in <{}>", n, desc.name);
                            if !selfclose {
                                self.skip_subtree(n, &child_stops);
                            }
                        } else {
                            self.path.push(n.to_string());
                            let child = if selfclose {
                                empty_node(&fd.descriptor)
                            } else {
                                self.parse_value(&fd.descriptor, &child_stops)
                            };
                            self.path.pop();
                            node.fields.insert(n.to_string(), child);
                        }
                    } else if let Some((fd, alt)) = union_route(schema, n) {
                        let field_tag = fd.descriptor.name.clone();
                        if node.fields.contains_key(&field_tag) {
                            debug!("ignoring duplicate <{}> in <{}>", n, desc.name);
                            if !selfclose {
                                self.skip_subtree(n, &child_stops);
                            }
                        } else {
                            self.path.push(field_tag.clone());
                            let un = self.resolve_union_branch(alt, n, selfclose, &child_stops);
                            self.path.pop();
                            node.fields.insert(field_tag, ParseNode::Union(un));
                        }
                    } else if n == desc.name && node.fields.is_empty() && !selfclose {
                        // the model repeated our own wrapper tag; descend
                        // through it
                    } else if in_stops(stops, n) {
                        self.cur.put_back(ev);
                        return node;
                    } else {
                        self.typo_hint(n, schema);
                        if !selfclose {
                            self.skip_subtree(n, &child_stops);
                        }
                    }
                }
                Event::End => {
                    self.mark_open();
                    return node;
                }
            }
        }
    }

    fn parse_list<'d>(
        &mut self,
        desc: &'d Descriptor,
        elem: &'d Descriptor,
        stops: &[&'d str],
    ) -> ListNode {
        let elem_eff = elem.effective();
        let mut items = Vec::new();
        let mut child_stops: Vec<&'d str> = stops.to_vec();
        child_stops.push(desc.name.as_str());
        child_stops.push(elem_eff.name.as_str());
        if let DescriptorKind::Union(alts) = &elem_eff.kind {
            child_stops.extend(alts.iter().map(|a| a.name.as_str()));
        }

        loop {
            match self.cur.next_event() {
                Event::Text(_) | Event::TrailingText(_) => {}
                Event::Close(n) if n == desc.name => {
                    return ListNode { items };
                }
                Event::Close(n) if in_stops(stops, n) => {
                    self.cur.put_back(Event::Close(n));
                    return ListNode { items };
                }
                Event::Close(n) => trace!("ignoring stray closing tag </{}>", n),
                ev @ (Event::Open(_) | Event::SelfClose(_)) => {
                    let n = match &ev {
                        Event::Open(n) | Event::SelfClose(n) => *n,
                        _ => unreachable!(),
                    };
                    let selfclose = matches!(&ev, Event::SelfClose(_));

                    if let DescriptorKind::Union(alts) = &elem_eff.kind {
                        if let Some(alt) = alts.iter().find(|a| a.name == n) {
                            self.path.push(format!("[{}]", items.len()));
                            let un = self.resolve_union_branch(alt, n, selfclose, &child_stops);
                            self.path.pop();
                            items.push(ParseNode::Union(un));
                            continue;
                        }
                    } else if n == elem_eff.name {
                        self.path.push(format!("[{}]", items.len()));
                        let child = if selfclose {
                            empty_node(elem)
                        } else {
                            self.parse_value(elem, &child_stops)
                        };
                        self.path.pop();
                        items.push(child);
                        continue;
                    }

                    if in_stops(stops, n) {
                        self.cur.put_back(ev);
                        return ListNode { items };
                    }
                    debug!("skipping unknown tag <{}> inside list <{}>", n, desc.name);
                    if !selfclose {
                        self.skip_subtree(n, &child_stops);
                    }
                }
                Event::End => {
                    self.mark_open();
                    return ListNode { items };
                }
            }
        }
    }

    /// Union behind its own wrapper tag (already consumed). The first
    /// alternative tag observed commits the branch permanently; anything
    /// after that is skipped until the wrapper closes.
    fn parse_union<'d>(
        &mut self,
        desc: &'d Descriptor,
        alts: &'d [Descriptor],
        stops: &[&'d str],
    ) -> UnionNode {
        let mut child_stops: Vec<&'d str> = stops.to_vec();
        child_stops.push(desc.name.as_str());
        child_stops.extend(alts.iter().map(|a| a.name.as_str()));

        let mut node = UnionNode { branch: None };
        loop {
            match self.cur.next_event() {
                Event::Text(_) | Event::TrailingText(_) => {}
                Event::Close(n) if n == desc.name => return node,
                Event::Close(n) if in_stops(stops, n) => {
                    self.cur.put_back(Event::Close(n));
                    return node;
                }
                Event::Close(n) => trace!("ignoring stray closing tag </{}>", n),
                ev @ (Event::Open(_) | Event::SelfClose(_)) => {
                    let n = match &ev {
                        Event::Open(n) | Event::SelfClose(n) => *n,
                        _ => unreachable!(),
                    };
                    let selfclose = matches!(&ev, Event::SelfClose(_));

                    if node.branch.is_none() {
                        if let Some(alt) = alts.iter().find(|a| a.name == n) {
                            let un = self.resolve_union_branch(alt, n, selfclose, &child_stops);
                            node.branch = un.branch;
                            continue;
                        }
                    }
                    if in_stops(stops, n) {
                        self.cur.put_back(ev);
                        return node;
                    }
                    debug!("skipping unknown tag <{}> inside union <{}>", n, desc.name);
                    if !selfclose {
                        self.skip_subtree(n, &child_stops);
                    }
                }
                Event::End => {
                    self.mark_open();
                    return node;
                }
            }
        }
    }

    /// The alternative's open tag has just been consumed.
    fn resolve_union_branch<'d>(
        &mut self,
        alt: &'d Descriptor,
        tag: &str,
        selfclose: bool,
        stops: &[&'d str],
    ) -> UnionNode {
        self.path.push(tag.to_string());
        let child = if selfclose {
            empty_node(alt)
        } else {
            self.parse_value(alt, stops)
        };
        self.path.pop();
        UnionNode {
            branch: Some((tag.to_string(), Box::new(child))),
        }
    }

    /// Consume a subtree we have no descriptor for. Same-name nesting is
    /// respected; a structural tag of an enclosing level aborts the skip
    /// so a truncated or unclosed subtree cannot swallow the document.
    fn skip_subtree(&mut self, name: &str, stops: &[&str]) {
        let mut depth = 1usize;
        loop {
            match self.cur.next_event() {
                Event::Open(n) => {
                    if n == name {
                        depth += 1;
                    } else if in_stops(stops, n) {
                        self.cur.put_back(Event::Open(n));
                        return;
                    }
                }
                Event::Close(n) => {
                    if n == name {
                        depth -= 1;
                        if depth == 0 {
                            return;
                        }
                    } else if in_stops(stops, n) {
                        self.cur.put_back(Event::Close(n));
                        return;
                    }
                }
                Event::End => return,
                _ => {}
            }
        }
    }

    fn typo_hint(&self, tag: &str, schema: &ObjectSchema) {
        let mut best: Option<(&str, f64)> = None;
        for f in &schema.fields {
            let score = strsim::jaro_winkler(tag, &f.descriptor.name);
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((f.descriptor.name.as_str(), score));
            }
        }
        match best {
            Some((name, score)) if score >= 0.85 => {
                debug!(
                    "skipping unknown tag <{}> (possible typo of <{}>)",
                    tag, name
                );
            }
            _ => debug!("skipping unknown tag <{}>", tag),
        }
    }
}

fn join_path(segments: &[String]) -> String {
    let mut out = String::new();
    for s in segments {
        if !out.is_empty() && !s.starts_with('[') {
            out.push('.');
        }
        out.push_str(s);
    }
    out
}

/* ------------------------------------------------------------------ */
/*  Finalization                                                      */
/* ------------------------------------------------------------------ */

impl ParseNode {
    fn finalize(
        &self,
        desc: &Descriptor,
        required: bool,
        mode: Mode,
    ) -> Result<FieldState, ParseError> {
        let required = required && !desc.is_optional();
        let eff = desc.effective();
        match (self, &eff.kind) {
            (ParseNode::Scalar(s), DescriptorKind::Scalar(ty)) => {
                let raw = s.raw.trim();
                match coerce(raw, ty) {
                    Ok(v) => Ok(FieldState::Valid(v)),
                    Err(reason) => match mode {
                        Mode::Partial => Ok(FieldState::Invalid {
                            raw: raw.to_string(),
                            reason,
                        }),
                        Mode::Final => Err(ParseError::TypeCoercion {
                            field: eff.name.clone(),
                            raw: raw.to_string(),
                            reason,
                        }),
                    },
                }
            }
            (ParseNode::Object(o), DescriptorKind::Object(schema)) => {
                let mut fields = Vec::with_capacity(schema.fields.len());
                for fd in &schema.fields {
                    let tag = fd.descriptor.name.as_str();
                    match o.fields.get(tag) {
                        Some(child) => fields.push((
                            tag.to_string(),
                            child.finalize(&fd.descriptor, fd.required, mode)?,
                        )),
                        None => {
                            if mode == Mode::Final && fd.required && !fd.descriptor.is_optional() {
                                return Err(ParseError::MissingRequiredField {
                                    parent: eff.name.clone(),
                                    field: tag.to_string(),
                                });
                            }
                            fields.push((tag.to_string(), FieldState::Unset));
                        }
                    }
                }
                Ok(FieldState::Valid(Value::Object(ObjectValue {
                    type_name: schema.type_name.clone(),
                    fields,
                })))
            }
            (ParseNode::List(l), DescriptorKind::List(elem)) => {
                let mut items = Vec::with_capacity(l.items.len());
                for item in &l.items {
                    items.push(item.finalize(elem, true, mode)?);
                }
                Ok(FieldState::Valid(Value::List(items)))
            }
            (ParseNode::Union(u), DescriptorKind::Union(alts)) => match &u.branch {
                Some((tag, child)) => match alts.iter().find(|a| a.name == *tag) {
                    Some(alt) => {
                        let inner = child.finalize(alt, true, mode)?;
                        Ok(FieldState::Valid(Value::Union(UnionValue {
                            tag: tag.clone(),
                            value: Box::new(inner),
                        })))
                    }
                    None => unresolved(eff, alts, required, mode),
                },
                None => unresolved(eff, alts, required, mode),
            },
            // shape always matches the descriptor by construction
            _ => Ok(FieldState::Unset),
        }
    }
}

fn unresolved(
    eff: &Descriptor,
    alts: &[Descriptor],
    required: bool,
    mode: Mode,
) -> Result<FieldState, ParseError> {
    match mode {
        Mode::Final if required => Err(ParseError::UnresolvedUnion {
            field: eff.name.clone(),
            alternatives: alts
                .iter()
                .map(|a| a.name.clone())
                .collect::<Vec<_>>()
                .join(", "),
        }),
        _ => Ok(FieldState::Unset),
    }
}

fn coerce(raw: &str, ty: &ScalarType) -> Result<Value, String> {
    match ty {
        ScalarType::String => Ok(Value::String(raw.to_string())),
        ScalarType::Int => raw
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| format!("expected an integer, got {:?}", raw)),
        ScalarType::Float => raw
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| format!("expected a number, got {:?}", raw)),
        ScalarType::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(format!("expected true or false, got {:?}", raw)),
        },
        ScalarType::Enum(variants) => variants
            .iter()
            .find(|v| *v == raw)
            .or_else(|| variants.iter().find(|v| v.eq_ignore_ascii_case(raw)))
            .map(|v| Value::Enum(v.clone()))
            .ok_or_else(|| format!("expected one of [{}], got {:?}", variants.join(", "), raw)),
    }
}
