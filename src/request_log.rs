//! Binary request log.
//!
//! A log is a plain concatenation of independent records:
//!
//! ```text
//! offset 0..7    magic "QUIXOTE!"
//! offset 8..11   format version, u32 big-endian (1)
//! offset 12..19  payload length N, u64 big-endian
//! offset 20..    payload (N bytes)
//! ```
//!
//! The payload is a Java-style XML properties document holding `Info.Method`,
//! `Info.Path`, one `Header.<name>` entry per header and one `File.<name>`
//! entry per body part. Records are read back sequentially; there is no index.

use crate::recorder::RequestRecord;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

pub use crate::error::RequestLogError;

/// Magic number and format version that open every record.
pub const HEADER: [u8; 12] = *b"QUIXOTE!\x00\x00\x00\x01";

const KEY_METHOD: &str = "Info.Method";
const KEY_PATH: &str = "Info.Path";
const PREFIX_HEADER: &str = "Header.";
const PREFIX_FILE: &str = "File.";
const PROPERTIES_DOCTYPE: &str = r#"properties SYSTEM "http://java.sun.com/dtd/properties.dtd""#;

/// Append one record to a log stream.
///
/// The stream is flushed after the header and again after the payload, so an
/// interrupted write leaves at most one torn record at the end of the log.
pub fn append<W: Write>(output: &mut W, record: &RequestRecord) -> Result<(), RequestLogError> {
    output.write_all(&HEADER)?;
    output.flush()?;

    let payload = encode_properties(&properties_of(record))?;
    output.write_all(&(payload.len() as u64).to_be_bytes())?;
    output.write_all(&payload)?;
    output.flush()?;
    Ok(())
}

/// Read the next record from a log stream.
///
/// Returns `Ok(None)` at a clean end of stream.
pub fn read<R: Read>(input: &mut R) -> Result<Option<RequestRecord>, RequestLogError> {
    let mut header = [0u8; 12];
    let n = read_fully(input, &mut header)?;
    if n == 0 {
        return Ok(None);
    }
    if header[..n] != HEADER[..n] {
        return Err(RequestLogError::Corrupt(format!(
            "invalid header: {}",
            hex(&header[..n])
        )));
    }
    if n < header.len() {
        return Err(RequestLogError::Truncated {
            expected: header.len() as u64,
            actual: n as u64,
        });
    }

    let mut length = [0u8; 8];
    let n = read_fully(input, &mut length)?;
    if n < length.len() {
        return Err(RequestLogError::Truncated {
            expected: length.len() as u64,
            actual: n as u64,
        });
    }
    let length = u64::from_be_bytes(length);

    let mut payload = Vec::new();
    input.by_ref().take(length).read_to_end(&mut payload)?;
    if (payload.len() as u64) < length {
        return Err(RequestLogError::Truncated {
            expected: length,
            actual: payload.len() as u64,
        });
    }

    let properties = decode_properties(&payload)?;
    record_of(properties).map(Some)
}

fn read_fully<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn properties_of(record: &RequestRecord) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    properties.insert(KEY_PATH.to_string(), record.path.clone());
    properties.insert(KEY_METHOD.to_string(), record.method.clone());
    for (name, value) in &record.headers {
        properties.insert(format!("{}{}", PREFIX_HEADER, name), value.clone());
    }
    for (name, value) in &record.files {
        properties.insert(format!("{}{}", PREFIX_FILE, name), value.clone());
    }
    properties
}

fn record_of(mut properties: BTreeMap<String, String>) -> Result<RequestRecord, RequestLogError> {
    let method = properties
        .remove(KEY_METHOD)
        .ok_or_else(|| RequestLogError::Corrupt(format!("record has no {}", KEY_METHOD)))?;
    let path = properties
        .remove(KEY_PATH)
        .ok_or_else(|| RequestLogError::Corrupt(format!("record has no {}", KEY_PATH)))?;

    let mut record = RequestRecord::new(method, path);
    for (key, value) in properties {
        if let Some(name) = key.strip_prefix(PREFIX_HEADER) {
            record.headers.insert(name.to_string(), value);
        } else if let Some(name) = key.strip_prefix(PREFIX_FILE) {
            record.files.insert(name.to_string(), value);
        }
    }
    Ok(record)
}

fn encode_properties(properties: &BTreeMap<String, String>) -> Result<Vec<u8>, RequestLogError> {
    let mut writer = Writer::new(Vec::new());
    let events = [
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("no"))),
        Event::DocType(BytesText::from_escaped(PROPERTIES_DOCTYPE)),
        Event::Start(BytesStart::new("properties")),
        Event::Start(BytesStart::new("comment")),
        Event::End(BytesEnd::new("comment")),
    ];
    for event in events {
        write(&mut writer, event)?;
    }
    for (key, value) in properties {
        write(
            &mut writer,
            Event::Start(BytesStart::new("entry").with_attributes([("key", key.as_str())])),
        )?;
        write(&mut writer, Event::Text(BytesText::new(value)))?;
        write(&mut writer, Event::End(BytesEnd::new("entry")))?;
    }
    write(&mut writer, Event::End(BytesEnd::new("properties")))?;
    Ok(writer.into_inner())
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), RequestLogError> {
    writer
        .write_event(event)
        .map_err(|e| RequestLogError::Io(io::Error::other(e.to_string())))
}

fn decode_properties(payload: &[u8]) -> Result<BTreeMap<String, String>, RequestLogError> {
    let corrupt = |e: &dyn std::fmt::Display| RequestLogError::Corrupt(format!("payload: {}", e));

    let mut reader = Reader::from_reader(payload);
    let mut buf = Vec::new();
    let mut properties = BTreeMap::new();
    let mut entry: Option<(String, String)> = None;
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| corrupt(&e))? {
            Event::Start(start) if start.local_name().as_ref() == b"properties" => saw_root = true,
            Event::Start(start) if start.local_name().as_ref() == b"entry" => {
                entry = Some((entry_key(&start)?, String::new()));
            }
            Event::Empty(start) if start.local_name().as_ref() == b"entry" => {
                properties.insert(entry_key(&start)?, String::new());
            }
            Event::Empty(start) if start.local_name().as_ref() == b"properties" => saw_root = true,
            Event::Text(text) => {
                if let Some((_, value)) = entry.as_mut() {
                    value.push_str(&text.unescape().map_err(|e| corrupt(&e))?);
                }
            }
            Event::CData(data) => {
                if let Some((_, value)) = entry.as_mut() {
                    value.push_str(std::str::from_utf8(&data).map_err(|e| corrupt(&e))?);
                }
            }
            Event::End(end) if end.local_name().as_ref() == b"entry" => {
                if let Some((key, value)) = entry.take() {
                    properties.insert(key, value);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(RequestLogError::Corrupt(
            "payload is not a properties document".to_string(),
        ));
    }
    Ok(properties)
}

fn entry_key(start: &BytesStart<'_>) -> Result<String, RequestLogError> {
    for attribute in start.attributes() {
        let attribute =
            attribute.map_err(|e| RequestLogError::Corrupt(format!("payload: {}", e)))?;
        if attribute.key.as_ref() == b"key" {
            let value = attribute
                .unescape_value()
                .map_err(|e| RequestLogError::Corrupt(format!("payload: {}", e)))?;
            return Ok(value.into_owned());
        }
    }
    Err(RequestLogError::Corrupt(
        "payload entry has no key".to_string(),
    ))
}

/// Iterator over the records of a log stream.
///
/// Stops after the first error; a torn trailing record shows up as a final
/// [`RequestLogError::Truncated`].
pub struct RequestLogReader<R> {
    input: R,
    finished: bool,
}

impl<R: Read> RequestLogReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            finished: false,
        }
    }
}

impl RequestLogReader<BufReader<File>> {
    /// Open a log file for reading.
    pub fn open(path: &Path) -> Result<Self, RequestLogError> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read> Iterator for RequestLogReader<R> {
    type Item = Result<RequestRecord, RequestLogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match read(&mut self.input) {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// A log file open for appending, shareable between request handlers.
#[derive(Debug)]
pub struct RequestLogWriter {
    output: Mutex<BufWriter<File>>,
}

impl RequestLogWriter {
    /// Open (creating if needed) a log file for appending.
    pub fn open(path: &Path) -> Result<Self, RequestLogError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            output: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Append one record. Records from concurrent callers never interleave.
    pub fn append(&self, record: &RequestRecord) -> Result<(), RequestLogError> {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        append(&mut *output, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn post_xyz() -> RequestRecord {
        RequestRecord::new("POST", "/x/y/z")
    }

    #[test]
    fn test_three_records_then_end() {
        let mut out = Vec::new();
        for _ in 0..3 {
            append(&mut out, &post_xyz()).unwrap();
        }

        let mut input = Cursor::new(out);
        for _ in 0..3 {
            let record = read(&mut input).unwrap().unwrap();
            assert_eq!(record.method, "POST");
            assert_eq!(record.path, "/x/y/z");
            assert!(record.headers.is_empty());
            assert!(record.files.is_empty());
        }
        assert!(read(&mut input).unwrap().is_none());
    }

    #[test]
    fn test_round_trip_with_headers_and_files() {
        let record = RequestRecord::new("PUT", "/a b/<c>&")
            .with_header("content-type", "text/plain;encoding=utf-8")
            .with_header("x-quote", "\"it's\"")
            .with_file("postData", "Hello. <&> café")
            .with_file("empty", "");

        let mut out = Vec::new();
        append(&mut out, &record).unwrap();
        let decoded = read(&mut Cursor::new(out)).unwrap().unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_record_layout() {
        let record = post_xyz().with_header("host", "localhost");
        let mut out = Vec::new();
        append(&mut out, &record).unwrap();

        assert_eq!(&out[..8], b"QUIXOTE!");
        assert_eq!(&out[8..12], &[0, 0, 0, 1]);
        let length = u64::from_be_bytes(out[12..20].try_into().unwrap());
        assert_eq!(length as usize, out.len() - 20);

        let payload = std::str::from_utf8(&out[20..]).unwrap();
        assert!(payload.contains("<!DOCTYPE properties"));
        assert!(payload.contains(r#"<entry key="Header.host">localhost</entry>"#));
        assert!(payload.contains(r#"<entry key="Info.Method">POST</entry>"#));
    }

    #[test]
    fn test_bad_magic() {
        let mut input = Cursor::new(b"NOTQUIXOTE!!\0\0\0\0\0\0\0\0".to_vec());
        assert!(matches!(read(&mut input), Err(RequestLogError::Corrupt(_))));
    }

    #[test]
    fn test_bad_version() {
        let mut out = Vec::new();
        append(&mut out, &post_xyz()).unwrap();
        out[11] = 2;
        assert!(matches!(
            read(&mut Cursor::new(out)),
            Err(RequestLogError::Corrupt(_))
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let mut out = Vec::new();
        append(&mut out, &post_xyz()).unwrap();
        out.truncate(out.len() - 5);
        assert!(matches!(
            read(&mut Cursor::new(out)),
            Err(RequestLogError::Truncated { .. })
        ));
    }

    #[test]
    fn test_truncated_header() {
        let mut input = Cursor::new(b"QUIX".to_vec());
        assert!(matches!(
            read(&mut input),
            Err(RequestLogError::Truncated { expected: 12, actual: 4 })
        ));
    }

    #[test]
    fn test_payload_must_be_properties() {
        let payload = b"<html/>";
        let mut out = HEADER.to_vec();
        out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        out.extend_from_slice(payload);
        assert!(matches!(
            read(&mut Cursor::new(out)),
            Err(RequestLogError::Corrupt(_))
        ));
    }

    #[test]
    fn test_reader_stops_at_torn_record() {
        let mut out = Vec::new();
        append(&mut out, &post_xyz()).unwrap();
        append(&mut out, &post_xyz()).unwrap();
        out.extend_from_slice(&HEADER[..6]);

        let results: Vec<_> = RequestLogReader::new(Cursor::new(out)).collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(results[2], Err(RequestLogError::Truncated { .. })));
    }

    #[test]
    fn test_file_writer_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.bin");

        let writer = RequestLogWriter::open(&path).unwrap();
        writer.append(&post_xyz()).unwrap();
        drop(writer);

        let writer = RequestLogWriter::open(&path).unwrap();
        writer
            .append(&RequestRecord::new("GET", "/second"))
            .unwrap();
        drop(writer);

        let records: Vec<_> = RequestLogReader::open(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].path, "/x/y/z");
        assert_eq!(records[1].path, "/second");
    }
}
