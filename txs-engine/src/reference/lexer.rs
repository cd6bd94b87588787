// Reference Expression Lexer
// Splits strings into literal text and {{tx-id.op-id.result.path}} placeholders

use crate::request::models::{is_valid_id, OpKey};

use std::fmt;

/// One step into a referenced result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// `.name`; also used for numeric dotted segments such as `items.0`
    Field(String),
    /// `[n]`
    Index(usize),
}

/// A parsed placeholder: which operation, and where inside its result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// `None` for the short form, which targets the referencing group
    pub tx_id: Option<String>,
    pub op_id: String,
    pub path: Vec<PathSegment>,
}

impl Reference {
    pub fn new(tx_id: Option<&str>, op_id: &str, path: Vec<PathSegment>) -> Self {
        Self {
            tx_id: tx_id.map(str::to_string),
            op_id: op_id.to_string(),
            path,
        }
    }

    /// Parse the text between `{{` and `}}`
    pub fn parse(inner: &str) -> Option<Self> {
        let mut parts = Vec::new();
        for part in inner.split('.') {
            parts.push(parse_part(part)?);
        }

        // Prefer the full form, then fall back to `op.result`
        let marker = if parts.len() >= 3 && is_result_marker(&parts[2]) {
            2
        } else if parts.len() >= 2 && is_result_marker(&parts[1]) {
            1
        } else {
            return None;
        };

        let ids: Vec<&str> = parts[..marker].iter().map(|(name, _)| name.as_str()).collect();
        if parts[..marker].iter().any(|(_, indexes)| !indexes.is_empty())
            || !ids.iter().all(|id| is_valid_id(id))
        {
            return None;
        }

        let mut path: Vec<PathSegment> = parts[marker]
            .1
            .iter()
            .map(|i| PathSegment::Index(*i))
            .collect();
        for (name, indexes) in &parts[marker + 1..] {
            if name.is_empty() {
                return None;
            }
            path.push(PathSegment::Field(name.clone()));
            path.extend(indexes.iter().map(|i| PathSegment::Index(*i)));
        }

        let (tx_id, op_id) = match ids.as_slice() {
            [tx_id, op_id] => (Some(*tx_id), *op_id),
            [op_id] => (None, *op_id),
            _ => return None,
        };
        Some(Reference::new(tx_id, op_id, path))
    }

    /// The operation this reference points at, relative to the referencing group
    pub fn target(&self, current_tx: &str) -> OpKey {
        OpKey::new(self.tx_id.as_deref().unwrap_or(current_tx), &self.op_id)
    }

    pub fn path_string(&self) -> String {
        let mut out = String::new();
        for segment in &self.path {
            match segment {
                PathSegment::Field(name) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(name);
                }
                PathSegment::Index(i) => out.push_str(&format!("[{}]", i)),
            }
        }
        out
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{{")?;
        if let Some(tx_id) = &self.tx_id {
            write!(f, "{}.", tx_id)?;
        }
        write!(f, "{}.result", self.op_id)?;
        for segment in &self.path {
            match segment {
                PathSegment::Field(name) => write!(f, ".{}", name)?,
                PathSegment::Index(i) => write!(f, "[{}]", i)?,
            }
        }
        write!(f, "}}}}")
    }
}

fn is_result_marker(part: &(String, Vec<usize>)) -> bool {
    part.0 == "result"
}

/// `name[0][1]` -> ("name", [0, 1]); rejects anything outside the reference alphabet
fn parse_part(part: &str) -> Option<(String, Vec<usize>)> {
    let (name, mut rest) = match part.find('[') {
        Some(pos) => (&part[..pos], &part[pos..]),
        None => (part, ""),
    };
    if name.is_empty() || !is_valid_id(name) {
        return None;
    }

    let mut indexes = Vec::new();
    while !rest.is_empty() {
        let close = rest.find(']')?;
        if !rest.starts_with('[') {
            return None;
        }
        let digits = &rest[1..close];
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        indexes.push(digits.parse().ok()?);
        rest = &rest[close + 1..];
    }
    Some((name.to_string(), indexes))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment<'a> {
    Literal(&'a str),
    Placeholder(Reference),
}

/// Scanner over one string value
pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, position: 0 }
    }

    /// Split the whole input; text that looks like `{{...}}` but is not a
    /// valid reference stays part of the surrounding literal
    pub fn tokenize(&mut self) -> Vec<Segment<'a>> {
        let mut segments = Vec::new();
        let mut literal_start = self.position;

        while let Some(offset) = self.input[self.position..].find("{{") {
            let open = self.position + offset;
            let Some(close_offset) = self.input[open + 2..].find("}}") else {
                break;
            };
            let close = open + 2 + close_offset;

            match Reference::parse(&self.input[open + 2..close]) {
                Some(reference) => {
                    if open > literal_start {
                        segments.push(Segment::Literal(&self.input[literal_start..open]));
                    }
                    segments.push(Segment::Placeholder(reference));
                    self.position = close + 2;
                    literal_start = self.position;
                }
                None => self.position = open + 1,
            }
        }

        if literal_start < self.input.len() {
            segments.push(Segment::Literal(&self.input[literal_start..]));
        }
        self.position = self.input.len();
        segments
    }
}

/// Every reference appearing in `input`, in order of appearance
pub fn extract_references(input: &str) -> Vec<Reference> {
    Lexer::new(input)
        .tokenize()
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Placeholder(reference) => Some(reference),
            Segment::Literal(_) => None,
        })
        .collect()
}

/// The reference when `input` is exactly one placeholder and nothing else
pub fn whole_reference(input: &str) -> Option<Reference> {
    let mut segments = Lexer::new(input).tokenize();
    match segments.as_slice() {
        [Segment::Placeholder(_)] => match segments.pop() {
            Some(Segment::Placeholder(reference)) => Some(reference),
            _ => None,
        },
        _ => None,
    }
}
