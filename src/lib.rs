//! Quixote Mock HTTP Server
//!
//! A tiny HTTP server for unit tests. Tests queue canned responses, point
//! the code under test at the server, and inspect the requests it made.
//!
//! # Features
//!
//! - **Single-Use Responses**: Each queued response answers exactly one request
//! - **Ordered Matching**: The first queued response whose method and path
//!   patterns match wins
//! - **Request Recording**: Every request is kept for later assertions
//! - **Request Log**: Requests can be appended to a binary log file
//! - **XML Configuration**: Servers can be seeded from a configuration file
//! - **Gzip**: Optional compression for clients that accept it
//!
//! # Example
//!
//! ```no_run
//! use quixote::MockServer;
//!
//! # async fn run() -> Result<(), quixote::error::ServerError> {
//! let server = MockServer::create(0).await?;
//! server
//!     .add_response()?
//!     .for_method("GET")?
//!     .for_path("/hello")?
//!     .with_status(200)
//!     .with_content_type("text/plain")
//!     .with_fixed_text("Hello.");
//!
//! // GET {uri}hello answers "Hello.", the next one answers 503
//! println!("{}", server.uri());
//! # Ok(())
//! # }
//! ```
//!
//! # Example Configuration
//!
//! ```xml
//! <Configuration xmlns="urn:com.io7m.quixote:configuration:1"
//!                HostName="localhost" Port="20000" GZIP="false">
//!   <Responses>
//!     <Response Method="GET" Path="^/hello" Status="200">
//!       <Headers>
//!         <Header Name="Content-Type" Value="text/plain"/>
//!       </Headers>
//!       <ContentUTF8>Hello.</ContentUTF8>
//!     </Response>
//!   </Responses>
//! </Configuration>
//! ```

pub mod config;
pub mod error;
pub mod recorder;
pub mod registry;
pub mod request_log;
pub mod response;
pub mod server;
pub mod xml;

pub use config::{Configuration, ServerConfiguration};
pub use recorder::RequestRecord;
pub use registry::ResponseBuilder;
pub use request_log::{RequestLogReader, RequestLogWriter};
pub use response::ResponseSpec;
pub use server::MockServer;
