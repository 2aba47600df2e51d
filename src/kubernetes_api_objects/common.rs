// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use std::fmt;

/// The identity of an object stored by the API server.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KubeObjectRef {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl KubeObjectRef {
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> KubeObjectRef {
        KubeObjectRef {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for KubeObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Builds the `k1=v1,k2=v2` form of an equality-based label selector.
pub fn label_selector_string<'a>(labels: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    labels
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parses an equality-based label selector. Returns None on set-based expressions.
pub fn parse_label_selector(selector: &str) -> Option<Vec<(String, String)>> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(|term| {
            let (key, value) = term.split_once('=')?;
            let key = key.trim_end_matches('=').trim();
            let value = value.trim_start_matches('=').trim();
            if key.is_empty() || key.ends_with('!') {
                None
            } else {
                Some((key.to_string(), value.to_string()))
            }
        })
        .collect()
}
