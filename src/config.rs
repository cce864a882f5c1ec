//! Configuration model.
//!
//! Server parameters plus the ordered list of responses the server is seeded
//! with. The on-disk form is the XML document handled by [`crate::xml`].

use crate::error::{ConfigError, SerializeError};
use crate::response::ResponseSpec;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Host name used when a configuration does not name one.
pub const DEFAULT_HOST_NAME: &str = "localhost";

/// Server parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfiguration {
    /// Host name or address to bind
    pub host_name: String,
    /// Port to bind (0 = ephemeral)
    pub port: u16,
    /// Compress responses for clients that accept gzip
    pub gzip: bool,
}

impl ServerConfiguration {
    /// Create server parameters with gzip disabled.
    pub fn new(host_name: impl Into<String>, port: u16) -> Self {
        Self {
            host_name: host_name.into(),
            port,
            gzip: false,
        }
    }

    /// The `host:port` string to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host_name, self.port)
    }
}

impl Default for ServerConfiguration {
    fn default() -> Self {
        Self::new(DEFAULT_HOST_NAME, 20000)
    }
}

/// A complete server configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    /// Server parameters
    pub server: ServerConfiguration,
    /// Responses, in the order they are queued
    pub responses: Vec<ResponseSpec>,
}

impl Configuration {
    /// Create a configuration with no responses.
    pub fn new(server: ServerConfiguration) -> Self {
        Self {
            server,
            responses: Vec::new(),
        }
    }

    /// Load configuration from an XML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let source = path.display().to_string();
        Ok(crate::xml::parse(&source, BufReader::new(file))?)
    }

    /// Write configuration to an XML file, replacing any existing content.
    pub fn write_to_file(&self, path: &Path) -> Result<(), SerializeError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut output = BufWriter::new(file);
        crate::xml::serialize(&mut output, self)?;
        output.flush()?;
        Ok(())
    }
}
