//! Resource metadata derived from filenames.
//!
//! A source file named `name.prop1.prop2.ext` addresses the resource `name`
//! of type `ext`, carrying the property tags `prop1` and `prop2`. Properties
//! double as platform tags: a property equal to a declared platform name pins
//! the resource to that platform, otherwise the resource is generic.

use std::path::Path;

/// Platform assigned to resources with no platform tag.
pub const GENERIC_PLATFORM: &str = "generic";

/// Metadata extracted from a resource filename. Pure, no I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    pub resource_name: String,
    pub resource_type: String,
    pub properties: Vec<String>,
}

impl ResourcePath {
    /// Parse the basename of `path` on its first and last dot.
    ///
    /// A filename with a single dot yields `properties == [""]`; a filename
    /// with no dot yields an empty resource type.
    pub fn parse(path: &str) -> ResourcePath {
        let basename = Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(path);

        match (basename.find('.'), basename.rfind('.')) {
            (Some(first), Some(last)) => {
                let properties = if first == last {
                    vec![String::new()]
                } else {
                    basename[first + 1..last]
                        .split('.')
                        .map(str::to_string)
                        .collect()
                };
                ResourcePath {
                    resource_name: basename[..first].to_string(),
                    resource_type: basename[last + 1..].to_string(),
                    properties,
                }
            }
            _ => ResourcePath {
                resource_name: basename.to_string(),
                resource_type: String::new(),
                properties: vec![String::new()],
            },
        }
    }

    /// Effective platform given the declared platform names.
    pub fn platform<'a>(&self, declared: impl IntoIterator<Item = &'a str>) -> String {
        platform_for_properties(&self.properties, declared)
    }
}

/// Effective platform for a property list given the declared platform names.
pub fn platform_for_properties<'a>(
    properties: &[String],
    declared: impl IntoIterator<Item = &'a str>,
) -> String {
    for name in declared {
        if properties.iter().any(|property| property == name) {
            return name.to_string();
        }
    }
    GENERIC_PLATFORM.to_string()
}
