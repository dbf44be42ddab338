use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ManifestError {
    #[error("No Deployments or StatefulSets found for input chart")]
    NoWorkloads,
    #[error("No objects found for input chart")]
    NoObjects,
    #[error("No pod selector labels found on the chart's Deployments or StatefulSets")]
    NoSelectorLabels,
}

/// The parts of one rendered object that the pipeline looks at.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct KubeObject {
    pub kind: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub match_labels: BTreeMap<String, String>,
    pub template_labels: BTreeMap<String, String>,
    pub service_selector: BTreeMap<String, String>,
    pub service_type: Option<String>,
}

impl KubeObject {
    pub fn reference(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }

    pub fn is_workload(&self) -> bool {
        self.kind.eq_ignore_ascii_case("deployment") || self.kind.eq_ignore_ascii_case("statefulset")
    }
}

/// Decodes every document of a rendered stream, skipping ones without a kind.
/// Fields of an unexpected shape read as empty instead of dropping the object.
pub fn parse(text: &str) -> impl Iterator<Item = KubeObject> + '_ {
    serde_yaml::Deserializer::from_str(text)
        .filter_map(|document| Value::deserialize(document).ok())
        .filter_map(|document| KubeObject::from_document(&document))
}

impl KubeObject {
    fn from_document(document: &Value) -> Option<Self> {
        let kind = document.get("kind").and_then(Value::as_str)?.trim();
        if kind.is_empty() {
            return None;
        }

        let metadata = document.get("metadata");
        let spec = document.get("spec");
        let selector = spec
            .and_then(|spec| spec.get("selector"))
            .and_then(Value::as_mapping);
        let is_service = kind.eq_ignore_ascii_case("service");
        let (match_labels, service_selector) = match selector {
            Some(selector) if is_service => (BTreeMap::new(), string_map(selector)),
            Some(selector) => (
                selector
                    .get("matchLabels")
                    .and_then(Value::as_mapping)
                    .map(string_map)
                    .unwrap_or_default(),
                BTreeMap::new(),
            ),
            None => (BTreeMap::new(), BTreeMap::new()),
        };

        Some(Self {
            kind: kind.to_string(),
            name: metadata
                .and_then(|metadata| metadata.get("name"))
                .and_then(scalar_text)
                .unwrap_or_default(),
            labels: labels_of(metadata),
            match_labels,
            template_labels: labels_of(
                spec.and_then(|spec| spec.get("template"))
                    .and_then(|template| template.get("metadata")),
            ),
            service_selector,
            service_type: spec
                .and_then(|spec| spec.get("type"))
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

fn labels_of(metadata: Option<&Value>) -> BTreeMap<String, String> {
    metadata
        .and_then(|metadata| metadata.get("labels"))
        .and_then(Value::as_mapping)
        .map(string_map)
        .unwrap_or_default()
}

fn string_map(mapping: &serde_yaml::Mapping) -> BTreeMap<String, String> {
    mapping
        .iter()
        .filter_map(|(key, value)| Some((scalar_text(key)?, scalar_text(value)?)))
        .collect()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// `kind/name` for every object in the stream.
pub fn object_refs(text: &str) -> Result<Vec<String>, ManifestError> {
    let refs = parse(text).map(|object| object.reference()).collect::<Vec<_>>();
    if refs.is_empty() {
        return Err(ManifestError::NoObjects);
    }
    Ok(refs)
}

/// `kind/name` for Deployments and StatefulSets only.
pub fn workload_refs(text: &str) -> Result<Vec<String>, ManifestError> {
    let refs = parse(text)
        .filter(KubeObject::is_workload)
        .map(|object| object.reference())
        .collect::<Vec<_>>();
    if refs.is_empty() {
        return Err(ManifestError::NoWorkloads);
    }
    Ok(refs)
}

/// Label selector matching the pods of every workload in the stream, e.g.
/// `app in (api,web),tier in (backend)`. Wildcard label keys are left out.
pub fn selector_constraint(
    text: &str,
    wildcard_labels: &[String],
) -> Result<String, ManifestError> {
    let mut clauses: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut found = false;

    for object in parse(text).filter(KubeObject::is_workload) {
        found = true;
        for (key, value) in object.match_labels {
            if wildcard_labels.contains(&key) {
                continue;
            }
            let values = clauses.entry(key).or_default();
            if !values.contains(&value) {
                values.push(value);
            }
        }
    }

    if !found {
        return Err(ManifestError::NoWorkloads);
    }
    if clauses.is_empty() {
        return Err(ManifestError::NoSelectorLabels);
    }

    Ok(clauses
        .into_iter()
        .map(|(key, values)| format!("{key} in ({})", values.join(",")))
        .collect::<Vec<_>>()
        .join(","))
}

/// Keeps only documents whose `kind:` line names one of `allowed`.
pub fn filter_kinds(text: &str, allowed: &[String]) -> String {
    let mut filtered = String::new();
    for document in split_documents(text) {
        let keep = document.iter().any(|line| {
            line.strip_prefix("kind:").is_some_and(|kind| {
                allowed
                    .iter()
                    .any(|wanted| wanted.trim().eq_ignore_ascii_case(kind.trim()))
            })
        });
        if keep {
            filtered.push_str("---\n");
            for line in document {
                filtered.push_str(line);
                filtered.push('\n');
            }
        }
    }
    filtered
}

fn split_documents(text: &str) -> Vec<Vec<&str>> {
    let mut documents = Vec::new();
    let mut current = Vec::new();
    for line in text.lines() {
        if line.trim_end() == "---" {
            if !current.is_empty() {
                documents.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        documents.push(current);
    }
    documents
}
