//! XML configuration codec.
//!
//! Parses and serializes [`Configuration`] documents of the form:
//!
//! ```xml
//! <Configuration xmlns="urn:com.io7m.quixote:configuration:1"
//!                HostName="localhost" Port="20001" GZIP="true">
//!   <Responses>
//!     <Response Method="GET" Path="/" Status="200">
//!       <Headers>
//!         <Header Name="content-type" Value="text/plain"/>
//!       </Headers>
//!       <ContentBase64>SGVsbG8u</ContentBase64>
//!     </Response>
//!   </Responses>
//! </Configuration>
//! ```
//!
//! Parsing builds a small element tree first and then checks it against the
//! document structure, collecting every problem as a [`ParseStatus`] so that a
//! failed parse reports all of them at once.

use crate::config::{Configuration, ServerConfiguration, DEFAULT_HOST_NAME};
use crate::error::{ParseFailure, SerializeError};
use crate::response::{Pattern, ResponseSpec, DEFAULT_METHOD_PATTERN, DEFAULT_PATH_PATTERN};
use base64::Engine;
use bytes::Bytes;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::{NsReader, Writer};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};

/// Namespace of version 1 configuration documents.
pub const NAMESPACE: &str = "urn:com.io7m.quixote:configuration:1";

/// Severity of a parse status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseSeverity {
    Error,
    Warning,
}

impl fmt::Display for ParseSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseSeverity::Error => f.write_str("error"),
            ParseSeverity::Warning => f.write_str("warning"),
        }
    }
}

/// Position in a source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Document identifier (file path, URI, ...)
    pub source: String,
    /// 1-based line
    pub line: u64,
    /// 1-based column
    pub column: u64,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source, self.line, self.column)
    }
}

/// A single structured diagnostic produced while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatus {
    pub severity: ParseSeverity,
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl ParseStatus {
    pub fn is_error(&self) -> bool {
        self.severity == ParseSeverity::Error
    }
}

impl fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}: {}: {}", location, self.severity, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Parse a configuration document in strict mode.
pub fn parse<R: Read>(source: &str, input: R) -> Result<Configuration, ParseFailure> {
    ConfigParser::new().parse(source, input)
}

/// Configuration document parser.
#[derive(Debug, Clone, Default)]
pub struct ConfigParser {
    ignore_unrecognized: bool,
}

impl ConfigParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Downgrade unrecognized children of `<Configuration>` to warnings.
    pub fn ignore_unrecognized(mut self, ignore: bool) -> Self {
        self.ignore_unrecognized = ignore;
        self
    }

    /// Parse a document.
    pub fn parse<R: Read>(&self, source: &str, input: R) -> Result<Configuration, ParseFailure> {
        self.parse_with_status(source, input, |_| {})
    }

    /// Parse a document, passing every status to `on_status` as well as
    /// collecting them into any resulting [`ParseFailure`].
    pub fn parse_with_status<R, F>(
        &self,
        source: &str,
        mut input: R,
        mut on_status: F,
    ) -> Result<Configuration, ParseFailure>
    where
        R: Read,
        F: FnMut(&ParseStatus),
    {
        let mut bytes = Vec::new();
        if let Err(e) = input.read_to_end(&mut bytes) {
            let status = ParseStatus {
                severity: ParseSeverity::Error,
                message: format!("I/O error: {}", e),
                location: None,
            };
            on_status(&status);
            return Err(ParseFailure {
                message: format!("{}: unable to read configuration", source),
                statuses: vec![status],
            });
        }

        let document = Document { source, bytes: &bytes };
        let mut decoder = Decoder {
            document: &document,
            ignore_unrecognized: self.ignore_unrecognized,
            statuses: Vec::new(),
        };

        let configuration = match document.read_tree() {
            Ok(root) => Some(decoder.configuration(&root)),
            Err(status) => {
                decoder.statuses.push(status);
                None
            }
        };

        for status in &decoder.statuses {
            on_status(status);
        }

        let errors = decoder.statuses.iter().filter(|s| s.is_error()).count();
        match configuration {
            Some(configuration) if errors == 0 => Ok(configuration),
            _ => Err(ParseFailure {
                message: format!(
                    "{}: configuration document is invalid ({} error(s))",
                    source,
                    errors.max(1)
                ),
                statuses: decoder.statuses,
            }),
        }
    }
}

struct Element {
    name: String,
    namespace: Option<String>,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
    offset: u64,
}

impl Element {
    fn is(&self, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(NAMESPACE)
    }

    fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{{{}}}{}", ns, self.name),
            None => self.name.clone(),
        }
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

struct Document<'a> {
    source: &'a str,
    bytes: &'a [u8],
}

impl Document<'_> {
    fn locate(&self, offset: u64) -> SourceLocation {
        let end = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(self.bytes.len());
        let prefix = &self.bytes[..end];
        let line = prefix.iter().filter(|b| **b == b'\n').count() as u64 + 1;
        let line_start = prefix
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|p| p + 1)
            .unwrap_or(0);
        SourceLocation {
            source: self.source.to_string(),
            line,
            column: (end - line_start) as u64 + 1,
        }
    }

    fn error(&self, offset: u64, message: impl Into<String>) -> ParseStatus {
        ParseStatus {
            severity: ParseSeverity::Error,
            message: message.into(),
            location: Some(self.locate(offset)),
        }
    }

    /// Read the whole document into an element tree. Malformed XML is fatal.
    fn read_tree(&self) -> Result<Element, ParseStatus> {
        let mut reader = NsReader::from_reader(self.bytes);
        let mut buf = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let offset = reader.buffer_position() as u64;
            let (namespace, event) = match reader.read_resolved_event_into(&mut buf) {
                Ok((resolved, event)) => (namespace_of(&resolved), event),
                Err(e) => return Err(self.error(offset, format!("malformed XML: {}", e))),
            };

            match event {
                Event::Start(start) => {
                    stack.push(self.open(&start, namespace, offset)?);
                }
                Event::Empty(start) => {
                    let element = self.open(&start, namespace, offset)?;
                    self.close(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| self.error(offset, "unexpected closing tag"))?;
                    self.close(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| self.error(offset, format!("malformed text: {}", e)))?;
                    self.text(&mut stack, &text, offset)?;
                }
                Event::CData(data) => {
                    let data = data.into_inner();
                    let text = std::str::from_utf8(&data)
                        .map_err(|e| self.error(offset, format!("CDATA is not UTF-8: {}", e)))?;
                    self.text(&mut stack, text, offset)?;
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(self.error(self.bytes.len() as u64, "unexpected end of document"));
        }
        root.ok_or_else(|| self.error(0, "document has no root element"))
    }

    fn open(
        &self,
        start: &BytesStart<'_>,
        namespace: Option<String>,
        offset: u64,
    ) -> Result<Element, ParseStatus> {
        let mut attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute
                .map_err(|e| self.error(offset, format!("malformed attribute: {}", e)))?;
            let key = attribute.key.as_ref();
            if key == b"xmlns" || key.starts_with(b"xmlns:") {
                continue;
            }
            let value = attribute
                .unescape_value()
                .map_err(|e| self.error(offset, format!("malformed attribute value: {}", e)))?;
            attributes.push((
                String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned(),
                value.into_owned(),
            ));
        }

        Ok(Element {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            namespace,
            attributes,
            children: Vec::new(),
            text: String::new(),
            offset,
        })
    }

    fn close(
        &self,
        stack: &mut [Element],
        root: &mut Option<Element>,
        element: Element,
    ) -> Result<(), ParseStatus> {
        match stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None if root.is_some() => {
                return Err(self.error(element.offset, "multiple root elements"));
            }
            None => *root = Some(element),
        }
        Ok(())
    }

    fn text(&self, stack: &mut [Element], text: &str, offset: u64) -> Result<(), ParseStatus> {
        match stack.last_mut() {
            Some(element) => element.text.push_str(text),
            None if !text.trim().is_empty() => {
                return Err(self.error(offset, "text outside of the root element"));
            }
            None => {}
        }
        Ok(())
    }
}

fn namespace_of(resolved: &ResolveResult<'_>) -> Option<String> {
    match resolved {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
        _ => None,
    }
}

/// Walks an element tree, producing a configuration and collecting statuses.
struct Decoder<'a> {
    document: &'a Document<'a>,
    ignore_unrecognized: bool,
    statuses: Vec<ParseStatus>,
}

impl Decoder<'_> {
    fn error(&mut self, element: &Element, message: impl Into<String>) {
        let status = self.document.error(element.offset, message);
        self.statuses.push(status);
    }

    fn warning(&mut self, element: &Element, message: impl Into<String>) {
        self.statuses.push(ParseStatus {
            severity: ParseSeverity::Warning,
            message: message.into(),
            location: Some(self.document.locate(element.offset)),
        });
    }

    fn check_attributes(&mut self, element: &Element, allowed: &[&str]) {
        for (name, _) in &element.attributes {
            if !allowed.contains(&name.as_str()) {
                self.error(
                    element,
                    format!("unrecognized attribute {} on {}", name, element.name),
                );
            }
        }
    }

    fn check_no_text(&mut self, element: &Element) {
        if !element.text.trim().is_empty() {
            self.error(element, format!("unexpected text in {}", element.name));
        }
    }

    fn check_no_children(&mut self, element: &Element) {
        for child in &element.children {
            self.error(
                child,
                format!(
                    "unrecognized element {} in {}",
                    child.qualified_name(),
                    element.name
                ),
            );
        }
    }

    fn required<'e>(&mut self, element: &'e Element, name: &str) -> Option<&'e str> {
        let value = element.attribute(name);
        if value.is_none() {
            self.error(
                element,
                format!("missing required attribute {} on {}", name, element.name),
            );
        }
        value
    }

    fn unsigned(&mut self, element: &Element, name: &str, value: &str) -> Option<u16> {
        match value.trim().parse::<u16>() {
            Ok(v) => Some(v),
            Err(e) => {
                self.error(
                    element,
                    format!("attribute {}: '{}' is not a valid unsigned integer: {}", name, value, e),
                );
                None
            }
        }
    }

    fn configuration(&mut self, root: &Element) -> Configuration {
        let mut configuration = Configuration::default();

        if !root.is("Configuration") {
            self.error(
                root,
                format!(
                    "expected root element {{{}}}Configuration, found {}",
                    NAMESPACE,
                    root.qualified_name()
                ),
            );
            return configuration;
        }

        self.check_attributes(root, &["HostName", "Port", "GZIP"]);
        self.check_no_text(root);

        let host_name = root
            .attribute("HostName")
            .unwrap_or(DEFAULT_HOST_NAME)
            .to_string();
        let port = self
            .required(root, "Port")
            .and_then(|value| self.unsigned(root, "Port", value))
            .unwrap_or_default();
        let gzip = match root.attribute("GZIP").map(str::trim) {
            None | Some("false") | Some("0") => false,
            Some("true") | Some("1") => true,
            Some(other) => {
                self.error(root, format!("attribute GZIP: '{}' is not a boolean", other));
                false
            }
        };
        configuration.server = ServerConfiguration {
            host_name,
            port,
            gzip,
        };

        let mut seen_responses = false;
        for child in &root.children {
            if child.is("Responses") {
                if seen_responses {
                    self.error(child, "duplicate Responses element");
                    continue;
                }
                seen_responses = true;
                configuration.responses = self.responses(child);
            } else if self.ignore_unrecognized {
                self.warning(
                    child,
                    format!("ignoring unrecognized element {}", child.qualified_name()),
                );
            } else {
                self.error(
                    child,
                    format!(
                        "unrecognized element {} in Configuration",
                        child.qualified_name()
                    ),
                );
            }
        }

        configuration
    }

    fn responses(&mut self, element: &Element) -> Vec<ResponseSpec> {
        self.check_attributes(element, &[]);
        self.check_no_text(element);

        let mut responses = Vec::new();
        for child in &element.children {
            if child.is("Response") {
                responses.push(self.response(child));
            } else {
                self.error(
                    child,
                    format!("unrecognized element {} in Responses", child.qualified_name()),
                );
            }
        }
        responses
    }

    fn response(&mut self, element: &Element) -> ResponseSpec {
        self.check_attributes(element, &["Method", "Path", "Status"]);
        self.check_no_text(element);

        let mut spec = ResponseSpec::default();

        let method = element.attribute("Method").unwrap_or(DEFAULT_METHOD_PATTERN);
        match Pattern::case_insensitive(method) {
            Ok(pattern) => spec.method = pattern,
            Err(e) => self.error(element, format!("attribute Method: invalid pattern: {}", e)),
        }

        let path = element.attribute("Path").unwrap_or(DEFAULT_PATH_PATTERN);
        match Pattern::new(path) {
            Ok(pattern) => spec.path = pattern,
            Err(e) => self.error(element, format!("attribute Path: invalid pattern: {}", e)),
        }

        if let Some(status) = self
            .required(element, "Status")
            .and_then(|value| self.unsigned(element, "Status", value))
        {
            spec.status = status;
        }

        // A Headers element replaces the default headers. Content children
        // apply in document order; the last one wins.
        let mut headers_seen = false;
        for child in &element.children {
            if child.is("Headers") {
                if !headers_seen {
                    spec.headers.clear();
                    headers_seen = true;
                }
                for (name, value) in self.headers(child) {
                    spec.set_header(&name, &value);
                }
            } else if child.is("ContentBase64") {
                if let Some(content) = self.content_base64(child) {
                    spec.content = content;
                }
            } else if child.is("ContentUTF8") {
                self.check_attributes(child, &[]);
                self.check_no_children(child);
                spec.content = Bytes::from(child.text.clone());
            } else {
                self.error(
                    child,
                    format!("unrecognized element {} in Response", child.qualified_name()),
                );
            }
        }

        spec
    }

    fn headers(&mut self, element: &Element) -> BTreeMap<String, String> {
        self.check_attributes(element, &[]);
        self.check_no_text(element);

        let mut headers = BTreeMap::new();
        for child in &element.children {
            if !child.is("Header") {
                self.error(
                    child,
                    format!("unrecognized element {} in Headers", child.qualified_name()),
                );
                continue;
            }
            self.check_attributes(child, &["Name", "Value"]);
            self.check_no_text(child);
            self.check_no_children(child);
            let name = self.required(child, "Name");
            let value = self.required(child, "Value");
            if let (Some(name), Some(value)) = (name, value) {
                headers.insert(name.to_string(), value.to_string());
            }
        }
        headers
    }

    fn content_base64(&mut self, element: &Element) -> Option<Bytes> {
        self.check_attributes(element, &[]);
        self.check_no_children(element);

        let compact: String = element
            .text
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        match base64::engine::general_purpose::STANDARD.decode(compact) {
            Ok(data) => Some(Bytes::from(data)),
            Err(e) => {
                self.error(element, format!("invalid base64 content: {}", e));
                None
            }
        }
    }
}

/// Serialize a configuration as a version 1 XML document.
///
/// Response order is preserved; headers are written sorted by name.
pub fn serialize<W: Write>(output: W, configuration: &Configuration) -> Result<(), SerializeError> {
    let mut writer = Writer::new_with_indent(output, b' ', 2);
    let server = &configuration.server;
    let port = server.port.to_string();

    write(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;
    write(
        &mut writer,
        Event::Start(BytesStart::new("Configuration").with_attributes([
            ("xmlns", NAMESPACE),
            ("HostName", server.host_name.as_str()),
            ("Port", port.as_str()),
            ("GZIP", if server.gzip { "true" } else { "false" }),
        ])),
    )?;
    write(&mut writer, Event::Start(BytesStart::new("Responses")))?;

    for response in &configuration.responses {
        let status = response.status.to_string();
        write(
            &mut writer,
            Event::Start(BytesStart::new("Response").with_attributes([
                ("Method", response.method.as_str()),
                ("Path", response.path.as_str()),
                ("Status", status.as_str()),
            ])),
        )?;

        write(&mut writer, Event::Start(BytesStart::new("Headers")))?;
        for (name, value) in &response.headers {
            write(
                &mut writer,
                Event::Empty(
                    BytesStart::new("Header")
                        .with_attributes([("Name", name.as_str()), ("Value", value.as_str())]),
                ),
            )?;
        }
        write(&mut writer, Event::End(BytesEnd::new("Headers")))?;

        let encoded = base64::engine::general_purpose::STANDARD.encode(&response.content);
        write(&mut writer, Event::Start(BytesStart::new("ContentBase64")))?;
        write(&mut writer, Event::CData(BytesCData::new(encoded)))?;
        write(&mut writer, Event::End(BytesEnd::new("ContentBase64")))?;

        write(&mut writer, Event::End(BytesEnd::new("Response")))?;
    }

    write(&mut writer, Event::End(BytesEnd::new("Responses")))?;
    write(&mut writer, Event::End(BytesEnd::new("Configuration")))?;

    let output = writer.get_mut();
    output.write_all(b"\n")?;
    output.flush()?;
    Ok(())
}

/// Serialize a configuration to a string.
pub fn to_string(configuration: &Configuration) -> Result<String, SerializeError> {
    let mut output = Vec::new();
    serialize(&mut output, configuration)?;
    String::from_utf8(output).map_err(|e| SerializeError::Xml(e.to_string()))
}

fn write<W: Write>(writer: &mut Writer<W>, event: Event<'_>) -> Result<(), SerializeError> {
    writer
        .write_event(event)
        .map_err(|e| SerializeError::Xml(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONF_0: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Configuration xmlns="urn:com.io7m.quixote:configuration:1" Port="20001" GZIP="true">
  <Responses>
    <Response Method="GET" Path="/" Status="200">
      <ContentBase64>
        SGVsbG8s
        IHdvcmxkLg==
      </ContentBase64>
    </Response>
  </Responses>
</Configuration>
"#;

    fn parse_str(text: &str) -> Result<Configuration, ParseFailure> {
        parse("urn:test", text.as_bytes())
    }

    fn sample_configuration() -> Configuration {
        let mut first = ResponseSpec::default();
        first.method = Pattern::case_insensitive("GET").unwrap();
        first.path = Pattern::new("^/xyz").unwrap();
        first.status = 201;
        first.set_header("Header-1", "ABC");
        first.set_header("Content-Type", "text/plain");
        first.set_header("Header-0", "XYZ");
        first.content = Bytes::from_static(b"Hello 0.");

        let mut second = ResponseSpec::default();
        second.status = 503;
        second.content = Bytes::from(vec![0u8, 1, 2, b'<', b'&', b'>', 0xff, b']', b']', b'>']);

        Configuration {
            server: ServerConfiguration {
                host_name: "example.com".to_string(),
                port: 9000,
                gzip: false,
            },
            responses: vec![first, second],
        }
    }

    #[test]
    fn test_parse_simple_document() {
        let config = parse_str(CONF_0).unwrap();
        assert_eq!(config.server.host_name, "localhost");
        assert_eq!(config.server.port, 20001);
        assert!(config.server.gzip);
        assert_eq!(config.responses.len(), 1);

        let response = &config.responses[0];
        assert_eq!(response.status, 200);
        assert_eq!(response.method.as_str(), "GET");
        assert_eq!(response.path.as_str(), "/");
        assert_eq!(
            response.headers.get("content-type"),
            Some(&"application/octet-stream".to_string())
        );
        assert_eq!(response.headers.len(), 1);
        assert_eq!(&response.content[..], b"Hello, world.");
    }

    #[test]
    fn test_parse_defaults_for_method_and_path() {
        let config = parse_str(
            r#"<Configuration xmlns="urn:com.io7m.quixote:configuration:1" Port="1">
                 <Responses><Response Status="204"/></Responses>
               </Configuration>"#,
        )
        .unwrap();
        let response = &config.responses[0];
        assert_eq!(response.method.as_str(), ".*");
        assert_eq!(response.path.as_str(), "^/.*");
        assert_eq!(response.status, 204);
        assert!(!config.server.gzip);
    }

    #[test]
    fn test_parse_utf8_content_and_headers() {
        let config = parse_str(
            r#"<Configuration xmlns="urn:com.io7m.quixote:configuration:1" Port="1">
                 <Responses>
                   <Response Status="200">
                     <Headers>
                       <Header Name="Content-Type" Value="text/plain"/>
                       <Header Name="X-Extra" Value="a &amp; b"/>
                     </Headers>
                     <ContentUTF8>caf&#233; &lt;ok&gt;</ContentUTF8>
                   </Response>
                 </Responses>
               </Configuration>"#,
        )
        .unwrap();
        let response = &config.responses[0];
        assert_eq!(response.content_type(), Some("text/plain"));
        assert_eq!(response.headers.get("x-extra"), Some(&"a & b".to_string()));
        assert_eq!(&response.content[..], "café <ok>".as_bytes());
    }

    #[test]
    fn test_last_content_child_wins() {
        let base64_last = parse_str(
            r#"<Configuration xmlns="urn:com.io7m.quixote:configuration:1" Port="1">
                 <Responses>
                   <Response Status="200">
                     <ContentUTF8>text</ContentUTF8>
                     <ContentBase64>Ynl0ZXM=</ContentBase64>
                   </Response>
                 </Responses>
               </Configuration>"#,
        )
        .unwrap();
        assert_eq!(&base64_last.responses[0].content[..], b"bytes");

        let utf8_last = parse_str(
            r#"<Configuration xmlns="urn:com.io7m.quixote:configuration:1" Port="1">
                 <Responses>
                   <Response Status="200">
                     <ContentBase64>Ynl0ZXM=</ContentBase64>
                     <ContentUTF8>text</ContentUTF8>
                   </Response>
                 </Responses>
               </Configuration>"#,
        )
        .unwrap();
        assert_eq!(&utf8_last.responses[0].content[..], b"text");
    }

    #[test]
    fn test_round_trip() {
        let config = sample_configuration();
        let text = to_string(&config).unwrap();
        let parsed = parse_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_round_trip_without_headers() {
        let mut response = ResponseSpec::default();
        response.headers.clear();
        let mut config = Configuration::default();
        config.responses.push(response);

        let text = to_string(&config).unwrap();
        let parsed = parse_str(&text).unwrap();
        assert!(parsed.responses[0].headers.is_empty());
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_headers_element_replaces_default_headers() {
        let config = parse_str(
            r#"<Configuration xmlns="urn:com.io7m.quixote:configuration:1" Port="1">
                 <Responses>
                   <Response Status="200">
                     <Headers>
                       <Header Name="X-Only" Value="1"/>
                     </Headers>
                   </Response>
                 </Responses>
               </Configuration>"#,
        )
        .unwrap();
        let headers = &config.responses[0].headers;
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-only"), Some(&"1".to_string()));
    }

    #[test]
    fn test_round_trip_empty() {
        let config = Configuration::default();
        let parsed = parse_str(&to_string(&config).unwrap()).unwrap();
        assert_eq!(parsed, config);
        assert!(parsed.responses.is_empty());
    }

    #[test]
    fn test_serialized_shape() {
        let text = to_string(&sample_configuration()).unwrap();
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(text.contains(
            "<Configuration xmlns=\"urn:com.io7m.quixote:configuration:1\" \
             HostName=\"example.com\" Port=\"9000\" GZIP=\"false\">"
        ));
        assert!(text.contains("<Response Method=\"GET\" Path=\"^/xyz\" Status=\"201\">"));

        let content_type = text.find("Name=\"content-type\"").unwrap();
        let header_0 = text.find("Name=\"header-0\"").unwrap();
        let header_1 = text.find("Name=\"header-1\"").unwrap();
        assert!(content_type < header_0 && header_0 < header_1);
    }

    #[test]
    fn test_missing_port() {
        let failure = parse_str(
            r#"<Configuration xmlns="urn:com.io7m.quixote:configuration:1">
                 <Responses/>
               </Configuration>"#,
        )
        .unwrap_err();
        assert_eq!(failure.error_count(), 1);
        assert!(failure.statuses[0].message.contains("Port"));
    }

    #[test]
    fn test_unparsable_status() {
        let failure = parse_str(
            r#"<Configuration xmlns="urn:com.io7m.quixote:configuration:1" Port="1">
                 <Responses><Response Status="ok"/></Responses>
               </Configuration>"#,
        )
        .unwrap_err();
        assert!(failure.statuses[0].message.contains("Status"));
    }

    #[test]
    fn test_all_errors_collected() {
        let failure = parse_str(
            r#"<Configuration xmlns="urn:com.io7m.quixote:configuration:1" Port="-1">
  <Responses>
    <Response Status="x"/>
    <Response Status="200" Path="(">
      <ContentBase64>!!!</ContentBase64>
    </Response>
  </Responses>
</Configuration>"#,
        )
        .unwrap_err();
        assert_eq!(failure.error_count(), 4);

        let status_error = failure
            .statuses
            .iter()
            .find(|s| s.message.contains("Status"))
            .unwrap();
        let location = status_error.location.as_ref().unwrap();
        assert_eq!(location.source, "urn:test");
        assert_eq!(location.line, 3);
    }

    #[test]
    fn test_unrecognized_element_strict() {
        let document = r#"<Configuration xmlns="urn:com.io7m.quixote:configuration:1" Port="1">
                 <Extra/>
                 <Responses/>
               </Configuration>"#;
        let failure = parse_str(document).unwrap_err();
        assert!(failure.statuses[0].message.contains("Extra"));

        let mut statuses = Vec::new();
        let config = ConfigParser::new()
            .ignore_unrecognized(true)
            .parse_with_status("urn:test", document.as_bytes(), |s| statuses.push(s.clone()))
            .unwrap();
        assert!(config.responses.is_empty());
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].severity, ParseSeverity::Warning);
    }

    #[test]
    fn test_wrong_namespace() {
        let failure =
            parse_str(r#"<Configuration xmlns="urn:other" Port="1"><Responses/></Configuration>"#)
                .unwrap_err();
        assert!(failure.statuses[0].message.contains("expected root element"));

        let failure = parse_str(r#"<Configuration Port="1"/>"#).unwrap_err();
        assert_eq!(failure.error_count(), 1);
    }

    #[test]
    fn test_unknown_attribute() {
        let failure = parse_str(
            r#"<Configuration xmlns="urn:com.io7m.quixote:configuration:1" Port="1" Color="red"/>"#,
        )
        .unwrap_err();
        assert!(failure.statuses[0].message.contains("Color"));
    }

    #[test]
    fn test_malformed_xml() {
        let failure = parse_str(
            r#"<Configuration xmlns="urn:com.io7m.quixote:configuration:1" Port="1">
                 <Responses>
               </Configuration>"#,
        )
        .unwrap_err();
        assert_eq!(failure.error_count(), 1);

        let failure = parse_str("").unwrap_err();
        assert!(failure.statuses[0].message.contains("no root element"));
    }
}
