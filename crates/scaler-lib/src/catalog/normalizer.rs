//! Catalog normalization
//!
//! Turns the platform's project listing into an ordered list of
//! [`ServiceRecord`]s. The listing may be a list of projects, a single
//! project, or a mapping of projects; each shape has its own adapter and
//! shape handling never leaves this module.

use super::fields::{self, json_type};
use crate::models::ServiceRecord;
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, warn};

/// Recognized layouts of the project listing
#[derive(Debug, Clone, Copy)]
pub enum CatalogShape<'a> {
    /// Ordered sequence of project objects
    List(&'a [Value]),
    /// One project object with `name` and `services`
    Single(&'a Map<String, Value>),
    /// Mapping of arbitrary keys to project objects
    Keyed(&'a Map<String, Value>),
}

impl<'a> CatalogShape<'a> {
    /// Classify an already unwrapped payload
    pub fn detect(payload: &'a Value) -> Option<Self> {
        match payload {
            Value::Array(items) => Some(CatalogShape::List(items)),
            Value::Object(map) if map.contains_key("name") && map.contains_key("services") => {
                Some(CatalogShape::Single(map))
            }
            Value::Object(map) => Some(CatalogShape::Keyed(map)),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CatalogShape::List(_) => "list",
            CatalogShape::Single(_) => "single",
            CatalogShape::Keyed(_) => "keyed",
        }
    }

    /// Project fragments in catalog order, with a location label and an
    /// optional fallback project name
    fn fragments(&self) -> Vec<ProjectFragment<'a>> {
        match *self {
            CatalogShape::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, value)| ProjectFragment {
                    location: format!("projects[{}]", i),
                    fallback_name: None,
                    body: FragmentBody::from_value(value),
                })
                .collect(),
            CatalogShape::Single(map) => vec![ProjectFragment {
                location: "project".to_string(),
                fallback_name: None,
                body: FragmentBody::Object(map),
            }],
            CatalogShape::Keyed(map) => map
                .iter()
                .map(|(key, value)| ProjectFragment {
                    location: format!("projects[{:?}]", key),
                    fallback_name: Some(key.as_str()),
                    body: FragmentBody::from_value(value),
                })
                .collect(),
        }
    }
}

enum FragmentBody<'a> {
    Object(&'a Map<String, Value>),
    Malformed(&'a Value),
}

impl<'a> FragmentBody<'a> {
    fn from_value(value: &'a Value) -> Self {
        match value {
            Value::Object(map) => FragmentBody::Object(map),
            other => FragmentBody::Malformed(other),
        }
    }
}

struct ProjectFragment<'a> {
    location: String,
    fallback_name: Option<&'a str>,
    body: FragmentBody<'a>,
}

/// A catalog fragment that could not be turned into a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizationWarning {
    /// Where in the payload the fragment sits
    pub location: String,
    pub message: String,
}

impl fmt::Display for NormalizationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Result of normalizing one catalog payload
#[derive(Debug, Clone, Default)]
pub struct NormalizedCatalog {
    pub records: Vec<ServiceRecord>,
    pub warnings: Vec<NormalizationWarning>,
}

impl NormalizedCatalog {
    fn warn(&mut self, location: impl Into<String>, message: impl Into<String>) {
        let warning = NormalizationWarning {
            location: location.into(),
            message: message.into(),
        };
        warn!(
            event = "normalization_warning",
            location = %warning.location,
            "Skipping malformed catalog fragment: {}",
            warning.message
        );
        self.warnings.push(warning);
    }
}

/// Normalize a raw catalog payload
///
/// Never fails: malformed fragments are skipped with a warning and an
/// unrecognizable payload yields no records.
pub fn normalize(payload: &Value) -> NormalizedCatalog {
    let mut catalog = NormalizedCatalog::default();
    let unwrapped = fields::unwrap_envelope(payload);

    let Some(shape) = CatalogShape::detect(unwrapped) else {
        catalog.warn(
            "catalog",
            format!("expected project list or object, got {}", json_type(unwrapped)),
        );
        return catalog;
    };

    debug!(shape = shape.label(), "Detected catalog shape");

    for fragment in shape.fragments() {
        match fragment.body {
            FragmentBody::Object(map) => parse_project(
                map,
                &fragment.location,
                fragment.fallback_name,
                &mut catalog,
            ),
            FragmentBody::Malformed(value) => catalog.warn(
                fragment.location,
                format!("expected project object, got {}", json_type(value)),
            ),
        }
    }

    catalog
}

fn non_empty_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_project(
    project: &Map<String, Value>,
    location: &str,
    fallback_name: Option<&str>,
    catalog: &mut NormalizedCatalog,
) {
    let Some(project_name) = non_empty_str(project, "name").or(fallback_name) else {
        catalog.warn(location, "project is missing a name");
        return;
    };

    let services = match project.get("services") {
        None | Some(Value::Null) => {
            debug!(project = %project_name, "Project has no services");
            return;
        }
        Some(Value::Array(services)) => services,
        Some(other) => {
            catalog.warn(
                location,
                format!(
                    "services of project {} should be a list, got {}",
                    project_name,
                    json_type(other)
                ),
            );
            return;
        }
    };

    for (i, service) in services.iter().enumerate() {
        let service_location = format!("{}.services[{}]", location, i);
        let Some(map) = service.as_object() else {
            catalog.warn(
                service_location,
                format!("expected service object, got {}", json_type(service)),
            );
            continue;
        };
        let Some(service_name) = non_empty_str(map, "name") else {
            catalog.warn(
                service_location,
                format!("service in project {} is missing a name", project_name),
            );
            continue;
        };

        let record = ServiceRecord {
            current_replicas: fields::replica_count(service),
            exposed_ports: fields::exposed_ports(service),
            cpu_percent: fields::cpu_percent(service),
            ..ServiceRecord::new(project_name, service_name)
        };

        debug!(
            service = %record.id,
            cpu = ?record.cpu_percent,
            replicas = ?record.current_replicas,
            "Discovered service"
        );
        catalog.records.push(record);
    }
}
