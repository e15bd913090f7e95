//! Checks whether a service description contains everything the adapter needs.

use std::collections::HashMap;

use crate::api::{CliOptions, Method, Route, ServiceDescription, EXTENSION};

/// Fatal problems of a service description, detected before serving.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No paths defined in OpenAPI specification.")]
    NoPaths,
    #[error("Unknown method {method} in path {path}")]
    UnknownMethod { method: String, path: String },
    #[error("No CLI options defined for method {method} in path {path}")]
    MissingCliOptions { method: String, path: String },
    #[error("Invalid CLI options for method {method} in path {path}: {source}")]
    InvalidCliOptions {
        method: String,
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("No executable or outputFileName defined for method {method} in path {path}")]
    NoExecutable { method: String, path: String },
    #[error("Invalid path {path}: parameters must fill a whole segment, ':' and '*' are reserved")]
    InvalidPath { path: String },
    #[error("Path {path} conflicts with path {other}")]
    ConflictingPaths { path: String, other: String },
}

/// Parameters the router accepts in a single path.
const MAX_PATH_PARAMS: usize = 26;

impl ServiceDescription {
    /// Validates the description and returns every operation as a [`Route`].
    ///
    /// # Errors
    /// The first [`ConfigError`] found, in path and method order.
    pub fn routes(&self) -> Result<Vec<Route>, ConfigError> {
        let paths = self.paths.as_ref().ok_or(ConfigError::NoPaths)?;
        let mut routes = Vec::new();
        let mut shapes: HashMap<String, &String> = HashMap::new();
        for (path, operations) in paths {
            let shape = route_shape(self.base_path.as_deref(), path)
                .ok_or_else(|| ConfigError::InvalidPath { path: path.clone() })?;
            if let Some(other) = shapes.insert(shape, path) {
                return Err(ConfigError::ConflictingPaths {
                    path: path.clone(),
                    other: other.clone(),
                });
            }
            for (method, operation) in operations {
                let Ok(parsed) = method.parse::<Method>() else {
                    return Err(ConfigError::UnknownMethod {
                        method: method.clone(),
                        path: path.clone(),
                    });
                };
                let Some(extension) = operation.get(EXTENSION).filter(|v| !v.is_null()) else {
                    return Err(ConfigError::MissingCliOptions {
                        method: method.clone(),
                        path: path.clone(),
                    });
                };
                let options = serde_json::from_value::<CliOptions>(extension.clone()).map_err(
                    |source| ConfigError::InvalidCliOptions {
                        method: method.clone(),
                        path: path.clone(),
                        source,
                    },
                )?;
                if options.executable.is_none() && options.output_file_name.is_none() {
                    return Err(ConfigError::NoExecutable {
                        method: method.clone(),
                        path: path.clone(),
                    });
                }
                routes.push(Route {
                    method: parsed,
                    path: path.clone(),
                    options,
                });
            }
        }
        Ok(routes)
    }
}

/// Converts an OpenAPI path template to the `:param` syntax of the router,
/// prefixed with the description's `basePath`.
///
/// Only `{name}` segments made of ascii alphanumerics and `_` are converted.
pub fn router_path(base_path: Option<&str>, template: &str) -> String {
    let base_path = base_path.unwrap_or_default().trim_end_matches('/');
    let mut path = String::with_capacity(base_path.len() + template.len());
    path.push_str(base_path);

    let mut rest = template;
    while let Some(start) = rest.find('{') {
        path.push_str(&rest[..start]);
        let candidate = &rest[start + 1..];
        match candidate.find('}') {
            Some(end)
                if end > 0
                    && candidate[..end]
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_') =>
            {
                path.push(':');
                path.push_str(&candidate[..end]);
                rest = &candidate[end + 1..];
            }
            _ => {
                path.push('{');
                rest = candidate;
            }
        }
    }
    path.push_str(rest);

    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    path
}

/// The router path with parameter names erased.
///
/// Two paths of the same shape match the same requests and can't be routed both.
/// `None` if the router can't represent the path.
fn route_shape(base_path: Option<&str>, template: &str) -> Option<String> {
    if base_path.unwrap_or_default().contains([':', '*']) || template.contains([':', '*']) {
        return None;
    }
    let path = router_path(base_path, template);
    let mut params = 0;
    let segments = path
        .split('/')
        .map(|segment| {
            if !segment.contains(':') {
                return Some(segment);
            }
            let name = segment.strip_prefix(':')?;
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return None;
            }
            params += 1;
            Some(":")
        })
        .collect::<Option<Vec<_>>>()?;
    (params <= MAX_PATH_PARAMS).then(|| segments.join("/"))
}
