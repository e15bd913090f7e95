//! This crate models the service description used to expose command-line tools as a REST api.
//! Additionally there is a canonical server implementation in the same repository.
//!
//! A service description is an OpenAPI 2.0 (fka Swagger) document in JSON form.
//! Every operation carries an `x-cli` extension object which tells the adapter
//! which executable to run and how the request is mapped onto it.
//!
//! ## Usage
//! For the complete format, see the serde structs in [`api`].
//! ```json
//! {
//!     "basePath": "/v1",
//!     "paths": {
//!         "/greet/{name}": {
//!             "get": {
//!                 "x-cli": {
//!                     "executable": "echo",
//!                     "args": ["hello", ":name"],
//!                     "headers": { "Content-Type": "text/plain" }
//!                 }
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! ## Placeholders
//! Entries of `args` and values of `headers` starting with `:` or `=` are placeholders.
//! They are substituted per request with request headers (camelCased, see [`api::header_key`]),
//! query parameters, path parameters and the synthesized `inputFile`, `outputFile` and `body`.
//! Both prefixes resolve to the same value, except that a `map` entry for a header
//! only changes what the `:` form resolves to.
//!
//! ## Working with files
//! With `inputToFile` the request body is written to `inputFileName` (or a generated name)
//! instead of the standard input of the process.
//! With `outputFromFile` the response body is read from `outputFileName` (or a generated name)
//! instead of the standard output.
//! Generated files only live as long as the request.
//!
//! ## Security
//! The description does not include any security measures, this is *remote execution as a service!*.
//! Make sure the served tools are safe to call with arbitrary input.

pub mod api;
pub mod validate;
