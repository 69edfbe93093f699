// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Deterministic cache keys for upstream requests.
//!
//! A [`Fingerprint`] collects every dimension that influences an upstream
//! result and renders them in a canonical form:
//!
//! ```text
//! /account:prod/end:2021-03-05/kind:space-cost/org:acme/space:abc123/start:2021-03-01
//! ```
//!
//! Dimensions are emitted in name order and multi-valued dimensions are sorted,
//! so the insertion order of the builder calls and of list inputs never affects
//! the result. Values are form-urlencoded, which keeps the `/`, `:` and `,`
//! separators unambiguous.
//!
//! Keys that are exposed outside the process (rendered images) go through
//! [`Fingerprint::hashed`], a salted SHA-256 digest in URL-safe base64.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use sha2::{Digest, Sha256};
use url::form_urlencoded::byte_serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    parts: BTreeMap<&'static str, String>,
}

impl Fingerprint {
    /// Starts a fingerprint for a result `kind` requested under `org`.
    pub fn new(kind: &str, org: &str) -> Self {
        let mut parts = BTreeMap::new();
        parts.insert("kind", escape(kind));
        parts.insert("org", escape(org));
        Self { parts }
    }

    /// Adds a single-valued dimension. A later call with the same name
    /// replaces the earlier value.
    pub fn with(mut self, name: &'static str, value: impl fmt::Display) -> Self {
        self.parts.insert(name, escape(&value.to_string()));
        self
    }

    /// Adds an optional dimension; `None` leaves the dimension out entirely.
    pub fn with_opt(self, name: &'static str, value: Option<impl fmt::Display>) -> Self {
        match value {
            Some(value) => self.with(name, value),
            None => self,
        }
    }

    /// Adds a multi-valued dimension, sorted before rendering.
    pub fn with_list<I, S>(mut self, name: &'static str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut values: Vec<String> = values.into_iter().map(|v| escape(v.as_ref())).collect();
        values.sort();
        self.parts.insert(name, values.join(","));
        self
    }

    /// Canonical string form, suitable as an in-process cache key.
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    /// Salted one-way digest of the canonical form in URL-safe base64.
    pub fn hashed(&self, token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hasher.update(self.canonical().as_bytes());
        URL_SAFE.encode(hasher.finalize())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.parts {
            write!(f, "/{}:{}", name, value)?;
        }
        Ok(())
    }
}

fn escape(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}
