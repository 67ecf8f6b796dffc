//! Server Faker
//!
//! A fake HTTP server driven by an endpoint file. Every endpoint either
//! answers with a static or generated body, or forwards the request to an
//! upstream service after templating it.
//!
//! # Features
//!
//! - **Static Responses**: JSON, XML or raw bytes, inline or from a file
//! - **Dynamic Responses**: JSON bodies generated from a tree of params
//! - **Random Values**: strings, integers, floats and booleans within bounds
//! - **Request Mapping**: values read from the request body, query or url
//! - **Proxying**: forward as is, or rebuild url, query and payload
//! - **Endpoint Generation**: derive an endpoint file from an example JSON
//!
//! # Example Configuration
//!
//! ```yaml
//! endpoints:
//!   - url: /users/:id
//!     method: GET
//!     response:
//!       status: 200
//!       type: dynamic
//!       format: json
//!       object:
//!         - key: id
//!           mapped:
//!             from: url
//!             param: id
//!             as: number
//!         - key: name
//!           random:
//!             type: string-lowercase
//!             min: 5
//!             max: 10
//! ```

pub mod builder;
pub mod config;
pub mod convert;
pub mod error;
pub mod mapped;
pub mod matcher;
pub mod proxy;
pub mod server;
pub mod transformer;
pub mod valuer;

pub use builder::Builder;
pub use config::FakerConfig;
pub use error::{ConfigError, SpecError};
pub use proxy::{Dispatch, HttpDispatcher};
pub use server::FakerServer;
pub use valuer::Valuer;
