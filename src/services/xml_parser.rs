//! XML parsing for complaint uploads.
//!
//! Documents are read with quick-xml and re-rendered with every general entity
//! reference substituted, including entities declared in the internal DTD subset
//! and, when enabled, external entities read from the local filesystem. Blank text,
//! comments and processing instructions are dropped and CDATA sections become text.
//!
//! Parsing runs on a blocking worker under a wall-clock budget. Expansion checks a
//! cooperative deadline and an output byte budget, so nested entity declarations
//! fail with a resource exhaustion error instead of running away.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::HashMap;
use std::io::Read;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

const MAX_ENTITY_DEPTH: usize = 64;
const TIMEOUT_GRACE: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("XML parsing timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Entity expansion exceeded {0} bytes")]
    ExpansionLimit(usize),

    #[error("Entity '{0}' not defined")]
    UndeclaredEntity(String),

    #[error("Detected an entity reference loop at '{0}'")]
    EntityLoop(String),

    #[error("Entity nesting deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("Invalid character reference '&{0};'")]
    InvalidCharRef(String),

    #[error("Unterminated entity reference in '{0}'")]
    UnterminatedReference(String),

    #[error("Malformed entity declaration: {0}")]
    MalformedDoctype(String),

    #[error("{0}")]
    Syntax(#[from] quick_xml::Error),

    #[error("Invalid attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("XML worker failed: {0}")]
    Worker(String),
}

impl XmlError {
    /// Errors caused by the document exhausting its time or size budget
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, XmlError::Timeout(_) | XmlError::ExpansionLimit(_))
    }
}

#[derive(Debug, Clone)]
pub struct XmlLimits {
    pub timeout: Duration,
    pub expansion_limit: usize,
    pub resolve_external: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EntityDecl {
    Internal(String),
    External(String),
}

/// Parses `data` on a blocking worker, giving up once `limits.timeout` has passed.
pub async fn parse_with_timeout(data: String, limits: XmlLimits) -> Result<String, XmlError> {
    let timeout = limits.timeout;
    let deadline = Instant::now() + timeout;
    let task = tokio::task::spawn_blocking(move || parse_and_render(&data, &limits, deadline));

    match tokio::time::timeout(timeout + TIMEOUT_GRACE, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(XmlError::Worker(e.to_string())),
        Err(_) => Err(XmlError::Timeout(timeout)),
    }
}

/// Parses `data` and renders it back to a string with entities substituted.
pub fn parse_and_render(
    data: &str,
    limits: &XmlLimits,
    deadline: Instant,
) -> Result<String, XmlError> {
    let mut reader = Reader::from_str(data);
    let mut expander = Expander::new(limits, deadline);
    let mut out = String::from("<?xml version=\"1.0\"?>\n");
    // character data between two pieces of markup, references already substituted
    let mut text = String::new();

    loop {
        let event = reader.read_event()?;
        if !matches!(event, Event::Text(_) | Event::CData(_) | Event::GeneralRef(_)) {
            flush_text(&mut out, &mut text);
        }

        match event {
            Event::DocType(e) => {
                let raw = String::from_utf8_lossy(&e).into_owned();
                expander.entities = parse_doctype(&raw)?;
                out.push_str("<!DOCTYPE ");
                out.push_str(raw.trim());
                out.push_str(">\n");
            }
            Event::Start(e) => {
                out.push('<');
                write_tag(&mut out, &e, &mut expander)?;
                out.push('>');
            }
            Event::Empty(e) => {
                out.push('<');
                write_tag(&mut out, &e, &mut expander)?;
                out.push_str("/>");
            }
            Event::End(e) => {
                out.push_str("</");
                out.push_str(&String::from_utf8_lossy(e.name().as_ref()));
                out.push('>');
            }
            Event::Text(e) => text.push_str(&String::from_utf8_lossy(&e)),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e)),
            Event::GeneralRef(e) => {
                let name = String::from_utf8_lossy(&e).into_owned();
                let value = expander.expand_reference(&name, 0)?;
                text.push_str(&value);
            }
            Event::Eof => break,
            // declarations, comments and processing instructions are not rendered
            _ => {}
        }
        expander.check_deadline()?;
    }

    Ok(out)
}

/// Writes pending character data, dropping blank runs between elements
fn flush_text(out: &mut String, text: &mut String) {
    if !text.trim().is_empty() {
        out.push_str(&escape(text.as_str()));
    }
    text.clear();
}

fn write_tag(out: &mut String, tag: &BytesStart, expander: &mut Expander) -> Result<(), XmlError> {
    out.push_str(&String::from_utf8_lossy(tag.name().as_ref()));
    for attr in tag.attributes() {
        let attr = attr?;
        let raw = String::from_utf8_lossy(&attr.value).into_owned();
        let value = expander.expand_text(&raw, 0)?;
        out.push(' ');
        out.push_str(&String::from_utf8_lossy(attr.key.as_ref()));
        out.push_str("=\"");
        out.push_str(&escape(value.as_str()));
        out.push('"');
    }
    Ok(())
}

struct Expander<'a> {
    entities: HashMap<String, EntityDecl>,
    limits: &'a XmlLimits,
    deadline: Instant,
    produced: usize,
    active: Vec<String>,
}

impl<'a> Expander<'a> {
    fn new(limits: &'a XmlLimits, deadline: Instant) -> Self {
        Self {
            entities: HashMap::new(),
            limits,
            deadline,
            produced: 0,
            active: Vec::new(),
        }
    }

    fn check_deadline(&self) -> Result<(), XmlError> {
        if Instant::now() >= self.deadline {
            return Err(XmlError::Timeout(self.limits.timeout));
        }
        Ok(())
    }

    /// Accounts for `len` bytes of expanded output
    fn produce(&mut self, len: usize) -> Result<(), XmlError> {
        self.produced = self.produced.saturating_add(len);
        if self.produced > self.limits.expansion_limit {
            return Err(XmlError::ExpansionLimit(self.limits.expansion_limit));
        }
        Ok(())
    }

    /// Substitutes every `&...;` reference in `raw`
    fn expand_text(&mut self, raw: &str, depth: usize) -> Result<String, XmlError> {
        let mut result = String::new();
        let mut rest = raw;

        while let Some(amp) = rest.find('&') {
            let literal = &rest[..amp];
            self.produce(literal.len())?;
            result.push_str(literal);

            let after = &rest[amp + 1..];
            let semi = after
                .find(';')
                .ok_or_else(|| XmlError::UnterminatedReference(raw.to_string()))?;
            let value = self.expand_reference(&after[..semi], depth)?;
            result.push_str(&value);
            rest = &after[semi + 1..];
        }

        self.produce(rest.len())?;
        result.push_str(rest);
        Ok(result)
    }

    /// Expands a single reference given without its `&` and `;`
    fn expand_reference(&mut self, name: &str, depth: usize) -> Result<String, XmlError> {
        self.check_deadline()?;

        if let Some(num) = name.strip_prefix('#') {
            let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16),
                None => num.parse::<u32>(),
            };
            let c = code
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| XmlError::InvalidCharRef(name.to_string()))?;
            self.produce(c.len_utf8())?;
            return Ok(c.to_string());
        }

        if let Some(c) = predefined(name) {
            self.produce(1)?;
            return Ok(c.to_string());
        }

        if depth >= MAX_ENTITY_DEPTH {
            return Err(XmlError::NestingTooDeep(MAX_ENTITY_DEPTH));
        }
        if self.active.iter().any(|a| a == name) {
            return Err(XmlError::EntityLoop(name.to_string()));
        }

        let decl = self
            .entities
            .get(name)
            .cloned()
            .ok_or_else(|| XmlError::UndeclaredEntity(name.to_string()))?;

        self.active.push(name.to_string());
        let expanded = match decl {
            EntityDecl::Internal(value) => self.expand_text(&value, depth + 1),
            EntityDecl::External(uri) => self.load_external(&uri),
        };
        self.active.pop();
        expanded
    }

    fn load_external(&mut self, uri: &str) -> Result<String, XmlError> {
        if !self.limits.resolve_external {
            debug!("External entity resolution disabled, skipping {}", uri);
            return Ok(String::new());
        }

        let Some(path) = local_path(uri) else {
            warn!("Not resolving external entity with remote URI: {}", uri);
            return Ok(String::new());
        };

        let remaining = self.limits.expansion_limit.saturating_sub(self.produced) as u64;
        let mut buf = Vec::new();
        let read = std::fs::File::open(&path)
            .and_then(|f| f.take(remaining + 1).read_to_end(&mut buf));
        if let Err(e) = read {
            warn!("Failed to load external entity {}: {}", uri, e);
            return Ok(String::new());
        }

        self.produce(buf.len())?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

fn predefined(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => None,
    }
}

/// Maps a SYSTEM identifier to a local file. Remote schemes yield `None`.
fn local_path(uri: &str) -> Option<String> {
    if let Some(rest) = uri.strip_prefix("file://") {
        // file:///C:/Windows/system.ini
        let bytes = rest.as_bytes();
        if bytes.len() > 2 && bytes[0] == b'/' && bytes[2] == b':' {
            return Some(rest[1..].to_string());
        }
        return Some(rest.to_string());
    }
    if uri.contains("://") {
        return None;
    }
    Some(uri.to_string())
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Quoted(&'a str),
    Close,
}

fn next_token(input: &str) -> Option<(Token<'_>, &str)> {
    let input = input.trim_start();
    let first = input.chars().next()?;
    match first {
        '>' => Some((Token::Close, &input[1..])),
        '"' | '\'' => {
            let body = &input[1..];
            let end = body.find(first)?;
            Some((Token::Quoted(&body[..end]), &body[end + 1..]))
        }
        _ => {
            let end = input
                .find(|c: char| c.is_whitespace() || c == '>' || c == '"' || c == '\'')
                .unwrap_or(input.len());
            Some((Token::Word(&input[..end]), &input[end..]))
        }
    }
}

/// Collects general entity declarations from a DOCTYPE's internal subset
fn parse_doctype(raw: &str) -> Result<HashMap<String, EntityDecl>, XmlError> {
    let mut entities = HashMap::new();
    let Some(open) = raw.find('[') else {
        return Ok(entities);
    };
    let subset = strip_comments(&raw[open + 1..]);
    let mut rest = subset.as_str();

    while let Some(pos) = rest.find("<!ENTITY") {
        rest = &rest[pos + "<!ENTITY".len()..];

        let mut tokens = Vec::new();
        loop {
            let (token, tail) = next_token(rest)
                .ok_or_else(|| XmlError::MalformedDoctype("unterminated <!ENTITY".to_string()))?;
            rest = tail;
            if token == Token::Close {
                break;
            }
            tokens.push(token);
        }

        let (name, decl) = match tokens.as_slice() {
            [Token::Word("%"), ..] => continue,
            [Token::Word(name), Token::Quoted(value), ..] => {
                (*name, EntityDecl::Internal(value.to_string()))
            }
            [Token::Word(name), Token::Word("SYSTEM"), Token::Quoted(uri), ..] => {
                (*name, EntityDecl::External(uri.to_string()))
            }
            [Token::Word(name), Token::Word("PUBLIC"), Token::Quoted(_), Token::Quoted(uri), ..] => {
                (*name, EntityDecl::External(uri.to_string()))
            }
            other => return Err(XmlError::MalformedDoctype(format!("{:?}", other))),
        };

        // the first declaration of an entity is binding
        entities.entry(name.to_string()).or_insert(decl);
    }

    Ok(entities)
}

/// Removes `<!-- ... -->` comments; an unterminated comment runs to the end
fn strip_comments(subset: &str) -> String {
    let mut out = String::with_capacity(subset.len());
    let mut rest = subset;
    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        match rest[start + 4..].find("-->") {
            Some(end) => rest = &rest[start + 4 + end + 3..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> XmlLimits {
        XmlLimits {
            timeout: Duration::from_secs(2),
            expansion_limit: 1024 * 1024,
            resolve_external: true,
        }
    }

    fn render(data: &str) -> Result<String, XmlError> {
        let limits = limits();
        parse_and_render(data, &limits, Instant::now() + limits.timeout)
    }

    #[test]
    fn test_renders_plain_document() {
        let out = render("<?xml version=\"1.0\"?>\n<complaint id=\"7\">\n  <text>Broken</text>\n  <empty/>\n</complaint>").unwrap();
        assert_eq!(
            out,
            "<?xml version=\"1.0\"?>\n<complaint id=\"7\"><text>Broken</text><empty/></complaint>"
        );
    }

    #[test]
    fn test_strips_comments_and_merges_cdata() {
        let out = render("<a><!-- hidden --><![CDATA[x < y]]></a>").unwrap();
        assert!(out.ends_with("<a>x &lt; y</a>"));
    }

    #[test]
    fn test_expands_internal_entities() {
        let doc = r#"<!DOCTYPE a [
            <!ENTITY who "world">
            <!ENTITY greet "hello &who;">
        ]>
        <a title="&greet;">&greet; &amp; &#x21;</a>"#;
        let out = render(doc).unwrap();
        assert!(out.contains("<a title=\"hello world\">hello world &amp; !</a>"));
        assert!(out.contains("<!DOCTYPE a ["));
    }

    #[test]
    fn test_expands_external_file_entity() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("secret.txt");
        std::fs::write(&secret, "root:x:0:0:root:/root:/bin/bash").unwrap();
        let doc = format!(
            "<!DOCTYPE a [<!ENTITY xxe SYSTEM \"file://{}\">]><a>&xxe;</a>",
            secret.display()
        );
        let out = render(&doc).unwrap();
        assert!(out.contains("<a>root:x:0:0:root:/root:/bin/bash</a>"));
    }

    #[test]
    fn test_external_entities_can_be_disabled() {
        let mut limits = limits();
        limits.resolve_external = false;
        let doc = "<!DOCTYPE a [<!ENTITY xxe SYSTEM \"file:///etc/passwd\">]><a>&xxe;</a>";
        let out = parse_and_render(doc, &limits, Instant::now() + limits.timeout).unwrap();
        assert!(out.ends_with("<a></a>"));
    }

    #[test]
    fn test_remote_entities_are_not_fetched() {
        let doc = "<!DOCTYPE a [<!ENTITY r SYSTEM \"http://example.com/x\">]><a>&r;</a>";
        let out = render(doc).unwrap();
        assert!(out.ends_with("<a></a>"));
    }

    #[test]
    fn test_undeclared_entity_is_an_error() {
        let err = render("<a>&nope;</a>").unwrap_err();
        assert!(matches!(err, XmlError::UndeclaredEntity(ref n) if n == "nope"));
        assert!(!err.is_resource_exhaustion());
    }

    #[test]
    fn test_entity_loop_is_an_error() {
        let doc = r#"<!DOCTYPE a [<!ENTITY x "&y;"><!ENTITY y "&x;">]><a>&x;</a>"#;
        assert!(matches!(render(doc), Err(XmlError::EntityLoop(_))));
    }

    #[test]
    fn test_deep_entity_chain_is_an_error() {
        let mut doc = String::from("<!DOCTYPE a [<!ENTITY e0 \"x\">");
        for i in 1..80 {
            doc.push_str(&format!("<!ENTITY e{} \"&e{};\">", i, i - 1));
        }
        doc.push_str("]><a>&e79;</a>");

        let err = render(&doc).unwrap_err();
        assert!(matches!(err, XmlError::NestingTooDeep(64)));
        assert!(!err.is_resource_exhaustion());
    }

    #[test]
    fn test_chain_within_depth_expands() {
        let mut doc = String::from("<!DOCTYPE a [<!ENTITY e0 \"x\">");
        for i in 1..60 {
            doc.push_str(&format!("<!ENTITY e{} \"&e{};\">", i, i - 1));
        }
        doc.push_str("]><a>&e59;</a>");

        assert!(render(&doc).unwrap().ends_with("<a>x</a>"));
    }

    #[test]
    fn test_billion_laughs_hits_expansion_limit() {
        let mut doc = String::from("<!DOCTYPE lolz [<!ENTITY lol0 \"lol\">");
        for i in 1..10 {
            let refs = format!("&lol{};", i - 1).repeat(10);
            doc.push_str(&format!("<!ENTITY lol{} \"{}\">", i, refs));
        }
        doc.push_str("]><lolz>&lol9;</lolz>");

        let err = render(&doc).unwrap_err();
        assert!(matches!(err, XmlError::ExpansionLimit(_)));
        assert!(err.is_resource_exhaustion());
    }

    #[test]
    fn test_empty_expansion_bomb_hits_deadline() {
        let mut doc = String::from("<!DOCTYPE d [<!ENTITY e0 \"\">");
        for i in 1..12 {
            let refs = format!("&e{};", i - 1).repeat(10);
            doc.push_str(&format!("<!ENTITY e{} \"{}\">", i, refs));
        }
        doc.push_str("]><d>&e11;</d>");

        let mut limits = limits();
        limits.timeout = Duration::from_millis(50);
        let err = parse_and_render(&doc, &limits, Instant::now() + limits.timeout).unwrap_err();
        assert!(matches!(err, XmlError::Timeout(_)));
    }

    #[test]
    fn test_mismatched_tags_are_syntax_errors() {
        let err = render("<a><b></a>").unwrap_err();
        assert!(matches!(err, XmlError::Syntax(_)));
    }

    #[test]
    fn test_parse_doctype_declarations() {
        let entities = parse_doctype(
            r#"root [
                <!ENTITY a 'single'>
                <!ENTITY a "ignored">
                <!ENTITY % p "param">
                <!ENTITY b PUBLIC "-//X//EN" "file:///tmp/b">
            ]"#,
        )
        .unwrap();
        assert_eq!(entities.get("a"), Some(&EntityDecl::Internal("single".into())));
        assert_eq!(entities.get("b"), Some(&EntityDecl::External("file:///tmp/b".into())));
        assert!(!entities.contains_key("p"));
        assert!(!entities.contains_key("%"));
    }

    #[test]
    fn test_commented_out_declarations_are_ignored() {
        let entities = parse_doctype(
            r#"a [
                <!-- <!ENTITY q 'z'> -->
                <!ENTITY r 'kept'>
                <!-- unterminated <!ENTITY s 'lost'>
            ]"#,
        )
        .unwrap();
        assert!(!entities.contains_key("q"));
        assert!(!entities.contains_key("s"));
        assert_eq!(entities.get("r"), Some(&EntityDecl::Internal("kept".into())));

        let err = render("<!DOCTYPE a [<!-- <!ENTITY q 'z'> --><!ENTITY r 'ok'>]><a>&r;&q;</a>")
            .unwrap_err();
        assert!(matches!(err, XmlError::UndeclaredEntity(ref n) if n == "q"));
    }

    #[test]
    fn test_strip_comments() {
        assert_eq!(strip_comments("a<!-- b -->c<!--d-->e"), "ace");
        assert_eq!(strip_comments("a<!-- open"), "a");
        assert_eq!(strip_comments("plain"), "plain");
    }

    #[test]
    fn test_local_path() {
        assert_eq!(local_path("file:///etc/passwd").as_deref(), Some("/etc/passwd"));
        assert_eq!(
            local_path("file:///C:/Windows/system.ini").as_deref(),
            Some("C:/Windows/system.ini")
        );
        assert_eq!(local_path("/etc/hosts").as_deref(), Some("/etc/hosts"));
        assert_eq!(local_path("https://example.com/a"), None);
    }

    #[tokio::test]
    async fn test_parse_with_timeout_reports_timeout() {
        let mut doc = String::from("<!DOCTYPE d [<!ENTITY e0 \"\">");
        for i in 1..12 {
            let refs = format!("&e{};", i - 1).repeat(10);
            doc.push_str(&format!("<!ENTITY e{} \"{}\">", i, refs));
        }
        doc.push_str("]><d>&e11;</d>");

        let mut limits = limits();
        limits.timeout = Duration::from_millis(100);
        let err = parse_with_timeout(doc, limits).await.unwrap_err();
        assert!(matches!(err, XmlError::Timeout(_)));
    }
}
