use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The name of the OpenAPI extension object holding the [`CliOptions`].
pub const EXTENSION: &str = "x-cli";

/// The subset of an OpenAPI 2.0 document the adapter reads.
///
/// Operations are kept as raw json, [`ServiceDescription::routes`](crate::validate)
/// turns them into typed [`Route`]s.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
    /// Path template -> method -> operation object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<BTreeMap<String, BTreeMap<String, Value>>>,
}

/// One operation of the description, ready to be served.
#[derive(Debug, Clone)]
pub struct Route {
    pub method: Method,
    /// The OpenAPI path template, e.g. `/users/{id}`.
    pub path: String,
    pub options: CliOptions,
}

/// The `x-cli` extension of an operation.
///
/// # Serialized Example
/// ```
/// # let ser = r#"
/// {
///     "executable": "convert",
///     "args": [":inputFile", "-resize", "=size", ":outputFile"],
///     "headers": { "Content-Type": ":accept" },
///     "map": { "accept": { "image/png": "png:-" } },
///     "inputToFile": true,
///     "outputFromFile": true
/// }
/// # "#;
/// # let options: cli_adapter_api::api::CliOptions
/// #    = serde_json::from_str(ser).expect("failed parsing");
/// # assert_eq!(options.args.len(), 4);
/// # assert_eq!(options.output_from_file, Some(true));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliOptions {
    /// The program to run. Without it the route only serves `output_file_name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    /// Argument template, placeholders start with `:` or `=`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Response header template, placeholders start with `:` or `=`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Request header name -> value mapping for the `:` placeholder.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub map: HashMap<String, ValueMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file_name: Option<String>,
    /// Stage the request body in the input file instead of piping it to stdin.
    #[serde(default)]
    pub input_to_file: bool,
    /// Read the response body from the output file instead of stdout.
    ///
    /// Left unset, a route without executable serves its output file anyway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_from_file: Option<bool>,
    /// Run through `sh -c` with the arguments joined by spaces.
    ///
    /// # Warning
    /// Substituted values are subject to shell expansion, any request can inject commands.
    /// Only meant for tools relying on shell features.
    #[serde(default)]
    pub shell: bool,
}

impl CliOptions {
    /// Looks up the value mapping of a request header by its canonical [`header_key`].
    pub fn value_mapping(&self, key: &str) -> Option<&ValueMapping> {
        self.map
            .get(key)
            .or_else(|| self.map.iter().find(|(k, _)| header_key(k) == key).map(|(_, v)| v))
    }
}

/// Translates raw request header values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueMapping {
    Transform(Transform),
    Table(HashMap<String, String>),
}

impl ValueMapping {
    /// The mapped value, or `None` if this mapping doesn't cover `raw`.
    pub fn apply(&self, raw: &str) -> Option<String> {
        match self {
            ValueMapping::Transform(transform) => Some(transform.apply(raw)),
            ValueMapping::Table(table) => table.get(raw).filter(|v| !v.is_empty()).cloned(),
        }
    }
}

/// Named transformations usable in place of a mapping table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    Lowercase,
    Uppercase,
    Trim,
}

impl Transform {
    pub fn apply(self, value: &str) -> String {
        match self {
            Transform::Lowercase => value.to_lowercase(),
            Transform::Uppercase => value.to_uppercase(),
            Transform::Trim => value.trim().to_owned(),
        }
    }
}

/// The http methods an operation may be declared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Method {
    Delete,
    Get,
    Post,
    Put,
    Options,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::Delete,
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Options,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Delete => "delete",
            Method::Get => "get",
            Method::Post => "post",
            Method::Put => "put",
            Method::Options => "options",
        }
    }
}

impl FromStr for Method {
    type Err = ();

    /// Only the lowercase OpenAPI spelling is accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL.into_iter().find(|m| m.as_str() == s).ok_or(())
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical placeholder key of a request header: its camelCased name.
///
/// `x-type`, `X-Type` and `xType` all become `xType`.
/// Segments written in all caps are lowercased first, so `X-API-KEY` becomes `xApiKey`.
pub fn header_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len());
    let segments = name
        .split(['-', '_', '.', ' '])
        .filter(|segment| !segment.is_empty());
    for segment in segments {
        let segment = if segment.chars().any(char::is_lowercase) {
            segment.to_owned()
        } else {
            segment.to_lowercase()
        };
        let mut chars = segment.chars();
        let Some(first) = chars.next() else { continue };
        if key.is_empty() {
            key.extend(first.to_lowercase());
        } else {
            key.extend(first.to_uppercase());
        }
        key.push_str(chars.as_str());
    }
    key
}
