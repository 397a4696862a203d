#![forbid(unsafe_code)]

//! Structural selector matching over snapshot elements. Only the subject
//! compound of a selector is evaluated; snapshots carry no ancestry.

use formseal_contracts::form_structure::{Element, FormStructure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrOp {
    Exists,
    Equals,
    Prefix,
    Suffix,
    Contains,
    Word,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrCondition {
    pub name: String,
    pub op: AttrOp,
    pub value: String,
}

impl AttrCondition {
    fn matches(&self, actual: Option<&str>) -> bool {
        let Some(actual) = actual else {
            return false;
        };
        match self.op {
            AttrOp::Exists => true,
            AttrOp::Equals => actual == self.value,
            AttrOp::Prefix => !self.value.is_empty() && actual.starts_with(&self.value),
            AttrOp::Suffix => !self.value.is_empty() && actual.ends_with(&self.value),
            AttrOp::Contains => !self.value.is_empty() && actual.contains(&self.value),
            AttrOp::Word => actual.split_whitespace().any(|word| word == self.value),
        }
    }
}

/// One compound selector: `tag#id.class[attr=v]...`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompoundSelector {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attributes: Vec<AttrCondition>,
}

impl CompoundSelector {
    pub fn matches(&self, element: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if tag != "*" && !tag.eq_ignore_ascii_case(element.tag_name.trim()) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if element.id.as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let present = element
                .class_name
                .as_deref()
                .unwrap_or_default()
                .split_whitespace()
                .collect::<Vec<_>>();
            if !self.classes.iter().all(|class| present.contains(&class.as_str())) {
                return false;
            }
        }
        self.attributes
            .iter()
            .all(|condition| condition.matches(element_attribute(element, &condition.name)))
    }

    fn is_empty(&self) -> bool {
        self.tag.is_none()
            && self.id.is_none()
            && self.classes.is_empty()
            && self.attributes.is_empty()
    }
}

/// Looks up an attribute by case-insensitive name. `id`, `name`, `class` and
/// `type` resolve to the element's dedicated slots first.
pub fn element_attribute<'a>(element: &'a Element, name: &str) -> Option<&'a str> {
    let name = name.trim();
    let slot = if name.eq_ignore_ascii_case("id") {
        element.id.as_deref()
    } else if name.eq_ignore_ascii_case("name") {
        element.name.as_deref()
    } else if name.eq_ignore_ascii_case("class") || name.eq_ignore_ascii_case("classname") {
        element.class_name.as_deref()
    } else if name.eq_ignore_ascii_case("type") {
        element.input_type.as_deref()
    } else {
        None
    };
    slot.or_else(|| {
        element
            .attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    })
}

/// Parses a selector list. Each entry keeps only its last compound; returns
/// `None` for syntax outside the supported subset.
pub fn parse_selector_list(raw: &str) -> Option<Vec<CompoundSelector>> {
    let mut out = Vec::new();
    for part in split_top_level(raw, |c| c == ',') {
        let subject = split_top_level(&part, |c| c.is_whitespace() || matches!(c, '>' | '+' | '~'))
            .into_iter()
            .filter(|piece| !piece.is_empty())
            .last()?;
        out.push(parse_compound(&subject)?);
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// True when any entry of the selector list matches the element.
pub fn selector_matches(raw: &str, element: &Element) -> bool {
    parse_selector_list(raw)
        .map(|list| list.iter().any(|selector| selector.matches(element)))
        .unwrap_or(false)
}

// Splits on `is_sep` outside of brackets and quotes. `~=` inside brackets
// never splits.
fn split_top_level(raw: &str, is_sep: impl Fn(char) -> bool) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for c in raw.trim().chars() {
        match (quote, c) {
            (Some(q), _) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), _) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                current.push(c);
            }
            (None, '[') => {
                depth += 1;
                current.push(c);
            }
            (None, ']') => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            (None, _) if depth == 0 && is_sep(c) => {
                parts.push(std::mem::take(&mut current).trim().to_string());
            }
            (None, _) => current.push(c),
        }
    }
    parts.push(current.trim().to_string());
    parts
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_')
}

fn parse_compound(raw: &str) -> Option<CompoundSelector> {
    let chars = raw.chars().collect::<Vec<_>>();
    let mut selector = CompoundSelector::default();
    let mut i = 0;

    if i < chars.len() && (chars[i] == '*' || is_ident_char(chars[i])) {
        let (tag, next) = if chars[i] == '*' {
            ("*".to_string(), i + 1)
        } else {
            take_ident(&chars, i)
        };
        selector.tag = Some(tag);
        i = next;
    }

    while i < chars.len() {
        match chars[i] {
            '#' => {
                let (id, next) = take_ident(&chars, i + 1);
                if id.is_empty() {
                    return None;
                }
                selector.id = Some(id);
                i = next;
            }
            '.' => {
                let (class, next) = take_ident(&chars, i + 1);
                if class.is_empty() {
                    return None;
                }
                selector.classes.push(class);
                i = next;
            }
            '[' => {
                let close = (i + 1..chars.len()).find(|&j| chars[j] == ']')?;
                let body = chars[i + 1..close].iter().collect::<String>();
                selector.attributes.push(parse_attr_condition(&body)?);
                i = close + 1;
            }
            _ => return None,
        }
    }

    if selector.is_empty() {
        None
    } else {
        Some(selector)
    }
}

fn take_ident(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && is_ident_char(chars[end]) {
        end += 1;
    }
    (chars[start..end].iter().collect(), end)
}

fn parse_attr_condition(body: &str) -> Option<AttrCondition> {
    let body = body.trim();
    let Some(eq) = body.find('=') else {
        let name = body.trim();
        if name.is_empty() || !name.chars().all(is_ident_char) {
            return None;
        }
        return Some(AttrCondition {
            name: name.to_string(),
            op: AttrOp::Exists,
            value: String::new(),
        });
    };

    let (head, tail) = body.split_at(eq);
    let (name, op) = match head.chars().last() {
        Some('^') => (&head[..head.len() - 1], AttrOp::Prefix),
        Some('$') => (&head[..head.len() - 1], AttrOp::Suffix),
        Some('*') => (&head[..head.len() - 1], AttrOp::Contains),
        Some('~') => (&head[..head.len() - 1], AttrOp::Word),
        _ => (head, AttrOp::Equals),
    };
    let name = name.trim();
    if name.is_empty() || !name.chars().all(is_ident_char) {
        return None;
    }
    Some(AttrCondition {
        name: name.to_string(),
        op,
        value: unquote(tail[1..].trim())?,
    })
}

fn unquote(raw: &str) -> Option<String> {
    for quote in ['"', '\''] {
        if let Some(inner) = raw.strip_prefix(quote) {
            return inner.strip_suffix(quote).map(str::to_string);
        }
    }
    if raw.chars().all(is_ident_char) {
        Some(raw.to_string())
    } else {
        None
    }
}

/// Translates the `//tag[@attr='v'][contains(@attr,'v')]` xpath subset into an
/// equivalent selector.
pub fn xpath_to_selector(xpath: &str) -> Option<String> {
    let rest = xpath.trim().strip_prefix("//")?;
    let tag_end = rest.find('[').unwrap_or(rest.len());
    let tag = rest[..tag_end].trim();
    if tag.is_empty() || !(tag == "*" || tag.chars().all(is_ident_char)) {
        return None;
    }
    let mut out = if tag == "*" { String::new() } else { tag.to_lowercase() };

    let mut predicates = &rest[tag_end..];
    while !predicates.is_empty() {
        if !predicates.starts_with('[') {
            return None;
        }
        let inner_end = predicates.find(']')?;
        let inner = predicates.get(1..inner_end)?.trim();
        predicates = predicates[inner_end + 1..].trim_start();
        for clause in inner.split(" and ") {
            out.push_str(&xpath_clause(clause.trim())?);
        }
    }
    if out.is_empty() {
        out.push('*');
    }
    Some(out)
}

fn xpath_clause(clause: &str) -> Option<String> {
    if let Some(args) = clause
        .strip_prefix("contains(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let (attr, value) = args.split_once(',')?;
        let attr = attr.trim().strip_prefix('@')?;
        return Some(format!("[{attr}*=\"{}\"]", escape_value(&unquote(value.trim())?)));
    }
    let attr = clause.strip_prefix('@')?;
    match attr.split_once('=') {
        Some((name, value)) => Some(format!(
            "[{}=\"{}\"]",
            name.trim(),
            escape_value(&unquote(value.trim())?)
        )),
        None => Some(format!("[{}]", attr.trim())),
    }
}

fn escape_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn is_plain_ident(value: &str) -> bool {
    value
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && value.chars().all(is_ident_char)
}

/// Compound selector built from everything the snapshot says about the
/// element: tag, id, classes, then `name` and `type`.
pub fn synthesize_selector(element: &Element) -> String {
    let mut out = element.tag_name.trim().to_lowercase();
    if let Some(id) = element.id.as_deref().filter(|id| !id.trim().is_empty()) {
        if is_plain_ident(id) {
            out.push('#');
            out.push_str(id);
        } else {
            out.push_str(&format!("[id=\"{}\"]", escape_value(id)));
        }
    }
    for class in element
        .class_name
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .filter(|class| is_plain_ident(class))
    {
        out.push('.');
        out.push_str(class);
    }
    if let Some(name) = element.name.as_deref().filter(|name| !name.is_empty()) {
        out.push_str(&format!("[name=\"{}\"]", escape_value(name)));
    }
    if let Some(input_type) = element.input_type.as_deref().filter(|t| !t.is_empty()) {
        out.push_str(&format!("[type=\"{}\"]", escape_value(input_type)));
    }
    out
}

/// Selector reported back to the caller for `form.elements[index]`. The first
/// of `#id`, `tag[name=".."]` and the synthesized compound that selects
/// exactly that element within the snapshot wins; otherwise the element is
/// addressed by its position among same-tag elements.
pub fn reported_selector(form: &FormStructure, index: usize) -> Option<String> {
    let element = form.elements.get(index)?;
    let tag = element.tag_name.trim().to_lowercase();

    let mut candidates = Vec::with_capacity(3);
    if let Some(id) = element.id.as_deref().filter(|id| !id.trim().is_empty()) {
        candidates.push(if is_plain_ident(id) {
            format!("#{id}")
        } else {
            format!("[id=\"{}\"]", escape_value(id))
        });
    }
    if let Some(name) = element.name.as_deref().filter(|name| !name.is_empty()) {
        candidates.push(format!("{tag}[name=\"{}\"]", escape_value(name)));
    }
    let synthesized = synthesize_selector(element);
    if synthesized != tag {
        candidates.push(synthesized);
    }

    candidates
        .into_iter()
        .find(|candidate| selects_only(form, index, candidate))
        .or_else(|| Some(format!("{tag}:nth-of-type({})", nth_of_type(form, index))))
}

/// 1-based position of `form.elements[index]` among elements with its tag.
pub fn nth_of_type(form: &FormStructure, index: usize) -> usize {
    let Some(element) = form.elements.get(index) else {
        return 0;
    };
    let tag = element.tag_name.trim();
    form.elements[..index]
        .iter()
        .filter(|other| other.tag_name.trim().eq_ignore_ascii_case(tag))
        .count()
        + 1
}

fn selects_only(form: &FormStructure, index: usize, selector: &str) -> bool {
    form.elements
        .iter()
        .enumerate()
        .all(|(position, element)| selector_matches(selector, element) == (position == index))
}
