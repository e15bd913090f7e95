//! Resolves the placeholder values of one request and substitutes them into the templates.

use std::collections::{BTreeMap, HashMap};

use axum::http::HeaderMap;
use cli_adapter_api::api::{header_key, CliOptions};

/// Prefix of placeholders resolving to the mapped value of a header.
const MAPPED: char = ':';
/// Prefix of placeholders always resolving to the raw value.
const RAW: char = '=';

const INPUT_FILE: &str = "inputFile";
const OUTPUT_FILE: &str = "outputFile";
const BODY: &str = "body";

/// Placeholders of a template which have no value for the current request.
#[derive(Debug, thiserror::Error)]
#[error("Unknown parameters: {}", .0.join(", "))]
pub struct UnknownParameters(pub Vec<String>);

/// The parts of a request placeholders can refer to.
#[derive(Debug, Clone, Copy)]
pub struct RequestData<'a> {
    pub headers: &'a HeaderMap,
    pub query: &'a [(String, String)],
    pub path: &'a [(String, String)],
    pub body: &'a [u8],
}

#[derive(Debug)]
struct Entry {
    raw: String,
    mapped: Option<String>,
}

/// Request-scoped lookup table from placeholder name to value.
///
/// Both placeholder syntaxes share one entry per name,
/// only the `:` form sees values produced by the route's `map`.
#[derive(Debug)]
pub struct ParameterTable {
    entries: HashMap<String, Entry>,
    /// File name the request body is staged in.
    pub input_file: String,
    /// File name the response body is read from.
    pub output_file: String,
}

impl ParameterTable {
    /// Builds the table for one request.
    ///
    /// Sources are applied in the order headers, query, path,
    /// so a path parameter shadows a query parameter of the same name.
    /// `inputFile`, `outputFile` and `body` always hold the server's values,
    /// requests can't redirect the staged files.
    pub fn resolve(id: u64, options: &CliOptions, request: RequestData<'_>) -> Self {
        let input_file = options
            .input_file_name
            .clone()
            .unwrap_or_else(|| generated_file_name("in", id));
        let output_file = options
            .output_file_name
            .clone()
            .unwrap_or_else(|| generated_file_name("out", id));

        let mut table = ParameterTable {
            entries: HashMap::new(),
            input_file,
            output_file,
        };
        for name in request.headers.keys() {
            let raw = request
                .headers
                .get_all(name)
                .iter()
                .map(|value| String::from_utf8_lossy(value.as_bytes()))
                .collect::<Vec<_>>()
                .join(", ");
            let key = header_key(name.as_str());
            let mapped = options
                .value_mapping(&key)
                .and_then(|mapping| mapping.apply(&raw));
            table.entries.insert(key, Entry { raw, mapped });
        }
        for (name, value) in request.query.iter().chain(request.path) {
            table.insert(name, value.clone());
        }

        table.insert(INPUT_FILE, table.input_file.clone());
        table.insert(OUTPUT_FILE, table.output_file.clone());
        // Binary bodies are not representable here, invalid utf-8 is replaced.
        table.insert(BODY, String::from_utf8_lossy(request.body).into_owned());
        table
    }

    fn insert(&mut self, name: &str, raw: String) {
        self.entries
            .insert(name.to_owned(), Entry { raw, mapped: None });
    }

    /// The value of a placeholder like `:name` or `=name`.
    pub fn get(&self, placeholder: &str) -> Option<&str> {
        if let Some(name) = placeholder.strip_prefix(MAPPED) {
            let entry = self.entries.get(name)?;
            Some(entry.mapped.as_deref().unwrap_or(&entry.raw))
        } else if let Some(name) = placeholder.strip_prefix(RAW) {
            self.entries.get(name).map(|entry| entry.raw.as_str())
        } else {
            None
        }
    }
}

/// Unique per request, see [`is_generated_file_name`].
fn generated_file_name(prefix: &str, id: u64) -> String {
    format!("{prefix}-{id:016x}")
}

/// Whether `name` was produced for a request that didn't configure its file names.
pub fn is_generated_file_name(name: &str) -> bool {
    let Some(id) = name
        .strip_prefix("in-")
        .or_else(|| name.strip_prefix("out-"))
    else {
        return false;
    };
    id.len() == 16 && id.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_placeholder(value: &str) -> bool {
    value.starts_with(MAPPED) || value.starts_with(RAW)
}

/// Substitutes the placeholders of an argument template.
///
/// # Errors
/// Lists every placeholder without value, nothing may be run in that case.
pub fn map_args(args: &[String], table: &ParameterTable) -> Result<Vec<String>, UnknownParameters> {
    let mut unknown = Vec::new();
    let mut mapped = Vec::with_capacity(args.len());
    for arg in args {
        if !is_placeholder(arg) {
            mapped.push(arg.clone());
        } else if let Some(value) = table.get(arg) {
            mapped.push(value.to_owned());
        } else {
            unknown.push(arg.clone());
        }
    }
    if unknown.is_empty() {
        Ok(mapped)
    } else {
        Err(UnknownParameters(unknown))
    }
}

/// Substitutes the placeholders of a response header template.
///
/// Headers with an unknown placeholder are left out during the pass,
/// the error is raised once all headers have been looked at.
///
/// # Errors
/// Lists every placeholder without value.
pub fn map_headers(
    headers: &BTreeMap<String, String>,
    table: &ParameterTable,
) -> Result<Vec<(String, String)>, UnknownParameters> {
    let mut unknown = Vec::new();
    let mut mapped = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_placeholder(value) {
            mapped.push((name.clone(), value.clone()));
        } else if let Some(resolved) = table.get(value) {
            mapped.push((name.clone(), resolved.to_owned()));
        } else {
            unknown.push(value.clone());
        }
    }
    if unknown.is_empty() {
        Ok(mapped)
    } else {
        Err(UnknownParameters(unknown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn options(value: serde_json::Value) -> CliOptions {
        serde_json::from_value(value).expect("valid options")
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn table(options: &CliOptions, headers: &HeaderMap, query: &[(String, String)]) -> ParameterTable {
        ParameterTable::resolve(
            7,
            options,
            RequestData {
                headers,
                query,
                path: &[],
                body: b"",
            },
        )
    }

    #[test]
    fn header_value_tables_only_change_the_colon_placeholder() {
        let options = options(json!({
            "executable": "true",
            "map": { "x-type": { "a": "mapped" } }
        }));
        let mut headers = HeaderMap::new();
        headers.insert("x-type", HeaderValue::from_static("a"));

        let table = table(&options, &headers, &[]);
        assert_eq!(table.get(":xType"), Some("mapped"));
        assert_eq!(table.get("=xType"), Some("a"));
    }

    #[test]
    fn unmapped_header_values_stay_raw() {
        let options = options(json!({
            "executable": "true",
            "map": { "xType": { "a": "mapped" } }
        }));
        let mut headers = HeaderMap::new();
        headers.insert("x-type", HeaderValue::from_static("zzz"));

        let table = table(&options, &headers, &[]);
        assert_eq!(table.get(":xType"), Some("zzz"));
        assert_eq!(table.get("=xType"), Some("zzz"));
    }

    #[test]
    fn header_transforms_apply_to_the_colon_placeholder() {
        let options = options(json!({ "executable": "true", "map": { "accept": "uppercase" } }));
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("text/plain"));

        let table = table(&options, &headers, &[]);
        assert_eq!(table.get(":accept"), Some("TEXT/PLAIN"));
        assert_eq!(table.get("=accept"), Some("text/plain"));
    }

    #[test]
    fn repeated_headers_are_joined() {
        let options = options(json!({ "executable": "true" }));
        let mut headers = HeaderMap::new();
        headers.append("x-tag", HeaderValue::from_static("a"));
        headers.append("x-tag", HeaderValue::from_static("b"));

        let table = table(&options, &headers, &[]);
        assert_eq!(table.get(":xTag"), Some("a, b"));
    }

    #[test]
    fn query_and_path_parameters_resolve_under_both_syntaxes() {
        let options = options(json!({ "executable": "true" }));
        let headers = HeaderMap::new();
        let query = pairs(&[("size", "10"), ("id", "from-query")]);
        let path = pairs(&[("id", "from-path")]);

        let table = ParameterTable::resolve(
            1,
            &options,
            RequestData {
                headers: &headers,
                query: &query,
                path: &path,
                body: b"",
            },
        );
        assert_eq!(table.get(":size"), Some("10"));
        assert_eq!(table.get("=size"), Some("10"));
        assert_eq!(table.get(":id"), Some("from-path"));
        assert_eq!(table.get("size"), None);
    }

    #[test]
    fn requests_cannot_override_server_values() {
        let options = options(json!({ "executable": "true", "map": { "input-file": "uppercase" } }));
        let mut headers = HeaderMap::new();
        headers.insert("input-file", HeaderValue::from_static("/etc/passwd"));
        let query = pairs(&[("outputFile", "../escape"), ("body", "forged")]);
        let path = pairs(&[("inputFile", "/etc/shadow")]);

        let table = ParameterTable::resolve(
            7,
            &options,
            RequestData {
                headers: &headers,
                query: &query,
                path: &path,
                body: b"real",
            },
        );
        assert_eq!(table.get(":inputFile"), Some("in-0000000000000007"));
        assert_eq!(table.get("=inputFile"), Some("in-0000000000000007"));
        assert_eq!(table.get(":outputFile"), Some("out-0000000000000007"));
        assert_eq!(table.get("=body"), Some("real"));
        assert_eq!(table.get(":body"), Some("real"));
    }

    #[test]
    fn file_names_are_configured_or_generated() {
        let headers = HeaderMap::new();
        let generated = table(&options(json!({ "executable": "true" })), &headers, &[]);
        assert_eq!(generated.input_file, "in-0000000000000007");
        assert_eq!(generated.output_file, "out-0000000000000007");
        assert_eq!(generated.get(":inputFile"), Some("in-0000000000000007"));
        assert!(is_generated_file_name(&generated.input_file));
        assert!(is_generated_file_name(&generated.output_file));

        let configured = table(
            &options(json!({ "executable": "true", "inputFileName": "a.png", "outputFileName": "b.png" })),
            &headers,
            &[],
        );
        assert_eq!(configured.get("=inputFile"), Some("a.png"));
        assert_eq!(configured.get(":outputFile"), Some("b.png"));
        assert!(!is_generated_file_name("b.png"));
        assert!(!is_generated_file_name("in-123"));
    }

    #[test]
    fn body_is_exposed_as_text() {
        let options = options(json!({ "executable": "true" }));
        let headers = HeaderMap::new();
        let table = ParameterTable::resolve(
            1,
            &options,
            RequestData {
                headers: &headers,
                query: &[],
                path: &[],
                body: b"hello \xff",
            },
        );
        assert_eq!(table.get(":body"), Some("hello \u{fffd}"));
        assert_eq!(table.get("=body"), Some("hello \u{fffd}"));
    }

    #[test]
    fn args_are_substituted() {
        let options = options(json!({ "executable": "true" }));
        let headers = HeaderMap::new();
        let query = pairs(&[("name", "world"), ("empty", "")]);
        let table = table(&options, &headers, &query);

        let args = map_args(
            &[
                String::from("--greet"),
                String::from(":name"),
                String::from("=empty"),
            ],
            &table,
        )
        .expect("all known");
        assert_eq!(args, ["--greet", "world", ""]);
    }

    #[test]
    fn unknown_args_are_all_reported() {
        let options = options(json!({ "executable": "true" }));
        let headers = HeaderMap::new();
        let table = table(&options, &headers, &[]);

        let err = map_args(
            &[String::from(":a"), String::from("plain"), String::from("=b")],
            &table,
        )
        .unwrap_err();
        assert_eq!(err.0, [":a", "=b"]);
        assert_eq!(err.to_string(), "Unknown parameters: :a, =b");
    }

    #[test]
    fn headers_are_substituted() {
        let options = options(json!({ "executable": "true" }));
        let headers = HeaderMap::new();
        let query = pairs(&[("type", "image/png")]);
        let table = table(&options, &headers, &query);

        let template = BTreeMap::from([
            (String::from("Content-Type"), String::from(":type")),
            (String::from("X-Static"), String::from("yes")),
        ]);
        let mapped = map_headers(&template, &table).expect("all known");
        assert_eq!(
            mapped,
            pairs(&[("Content-Type", "image/png"), ("X-Static", "yes")])
        );
    }

    #[test]
    fn unknown_headers_fail_after_the_full_pass() {
        let options = options(json!({ "executable": "true" }));
        let headers = HeaderMap::new();
        let table = table(&options, &headers, &[]);

        let template = BTreeMap::from([
            (String::from("A"), String::from(":missing")),
            (String::from("B"), String::from("ok")),
            (String::from("C"), String::from("=gone")),
        ]);
        let err = map_headers(&template, &table).unwrap_err();
        assert_eq!(err.0, [":missing", "=gone"]);
    }
}
