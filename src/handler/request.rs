//! Request translation: live HTTP request -> immutable wire descriptor.
//!
//! # Responsibilities
//! - Capture method, URI, headers, cookies, query and middleware attributes
//! - Sanitize log-bound fields (CR/LF stripped from the raw query)
//! - Resolve the effective client address through trusted proxies
//! - Fold multipart fields and uploads into the nested data tree
//!
//! # Design Decisions
//! - Attribute values are opaque pass-through data set by upstream
//!   middleware via request extensions; the gateway never interprets them
//! - The descriptor is pooled; `reset` clears every field and deletes any
//!   temp files still owned by the request

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use axum::http::request::Parts;
use serde_json::{json, Map, Value};

use crate::handler::pool::Reset;
use crate::handler::uploads::UploadDescriptor;

/// Opaque string-keyed values attached by upstream middleware through
/// request extensions; forwarded to the worker verbatim.
#[derive(Debug, Clone, Default)]
pub struct Attributes(pub Map<String, Value>);

/// One upload slot, keyed by its parsed multipart field name path.
#[derive(Debug, Clone, Default)]
pub struct UploadEntry {
    pub key: Vec<String>,
    pub descriptor: UploadDescriptor,
}

/// Transport-neutral view of one inbound HTTP request. Pooled; populated by
/// the translator, serialized into the wire context for the worker.
#[derive(Debug, Default)]
pub struct RequestDescriptor {
    pub remote_addr: String,
    pub protocol: String,
    pub method: String,
    pub uri: String,
    pub raw_query: String,
    pub headers: HashMap<String, Vec<String>>,
    pub cookies: HashMap<String, String>,
    pub attributes: Map<String, Value>,
    pub parsed: bool,
    pub uploads: Vec<UploadEntry>,
    pub data: Value,
    pub body: Vec<u8>,
}

impl RequestDescriptor {
    /// Populate the descriptor from request metadata. Body handling happens
    /// separately, driven by the handler.
    pub fn hydrate(&mut self, parts: &Parts, peer: SocketAddr, trusted_proxies: &[IpAddr]) {
        self.raw_query = sanitize_query(parts.uri.query().unwrap_or(""));
        self.remote_addr = fetch_ip(peer, parts, trusted_proxies);
        self.protocol = format!("{:?}", parts.version);
        self.method = parts.method.as_str().to_string();
        self.uri = full_uri(parts);

        self.headers.clear();
        for (name, value) in parts.headers.iter() {
            self.headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        self.cookies = parse_cookies(parts);

        if let Some(attrs) = parts.extensions.get::<Attributes>() {
            self.attributes = attrs.0.clone();
        }

        self.parsed = false;
        self.data = Value::Null;
        self.body.clear();
    }

    /// Record a resolved upload under its (possibly nested) field name.
    pub fn push_upload(&mut self, field_name: &str, descriptor: UploadDescriptor) {
        self.uploads.push(UploadEntry {
            key: parse_field_key(field_name),
            descriptor,
        });
    }

    /// Fold a plain form field into the data tree.
    pub fn push_field(&mut self, field_name: &str, value: String) {
        if !self.data.is_object() {
            self.data = Value::Object(Map::new());
        }
        tree_insert(&mut self.data, &parse_field_key(field_name), Value::String(value));
        self.parsed = true;
    }

    /// Uploads folded into a tree mirroring the field-name nesting.
    pub fn uploads_tree(&self) -> Value {
        let mut root = Value::Object(Map::new());
        for entry in &self.uploads {
            let leaf = serde_json::to_value(&entry.descriptor).unwrap_or(Value::Null);
            tree_insert(&mut root, &entry.key, leaf);
        }
        root
    }

    /// The serialized request metadata handed to the worker.
    pub fn wire_context(&self) -> Value {
        json!({
            "remoteAddr": self.remote_addr,
            "protocol": self.protocol,
            "method": self.method,
            "uri": self.uri,
            "rawQuery": self.raw_query,
            "headers": self.headers,
            "cookies": self.cookies,
            "attributes": self.attributes,
            "parsed": self.parsed,
            "uploads": self.uploads_tree(),
            "data": if self.parsed { self.data.clone() } else { Value::Null },
        })
    }
}

impl Reset for RequestDescriptor {
    fn reset(&mut self) {
        // temp files are owned by the request until it completes
        for entry in &self.uploads {
            if let Some(path) = &entry.descriptor.tmp_path {
                if let Err(e) = std::fs::remove_file(path) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove upload temp file");
                }
            }
        }

        self.remote_addr.clear();
        self.protocol.clear();
        self.method.clear();
        self.uri.clear();
        self.raw_query.clear();
        self.headers.clear();
        self.cookies.clear();
        self.attributes.clear();
        self.parsed = false;
        self.uploads.clear();
        self.data = Value::Null;
        self.body.clear();
    }
}

/// CR/LF are stripped before the query reaches logs or the worker.
fn sanitize_query(raw: &str) -> String {
    raw.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// Effective client address: the first `X-Forwarded-For` hop when the socket
/// peer is a trusted proxy, otherwise the peer itself.
fn fetch_ip(peer: SocketAddr, parts: &Parts, trusted_proxies: &[IpAddr]) -> String {
    if trusted_proxies.contains(&peer.ip()) {
        if let Some(fwd) = parts.headers.get("x-forwarded-for") {
            if let Ok(fwd) = fwd.to_str() {
                if let Some(first) = fwd.split(',').next() {
                    if let Ok(ip) = first.trim().parse::<IpAddr>() {
                        return ip.to_string();
                    }
                }
            }
        }
    }
    peer.ip().to_string()
}

fn full_uri(parts: &Parts) -> String {
    if parts.uri.authority().is_some() {
        return parts.uri.to_string();
    }
    let host = parts
        .headers
        .get(axum::http::header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("http://{host}{path}")
}

fn parse_cookies(parts: &Parts) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for header in parts.headers.get_all(axum::http::header::COOKIE) {
        let Ok(header) = header.to_str() else { continue };
        for pair in header.split(';') {
            if let Some((name, value)) = pair.split_once('=') {
                cookies.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
    }
    cookies
}

/// Parse `upload[x][y][]` into `["upload", "x", "y", ""]`; the empty
/// trailing segment means "append to array".
fn parse_field_key(name: &str) -> Vec<String> {
    match name.split_once('[') {
        None => vec![name.to_string()],
        Some((head, rest)) => {
            let mut keys = vec![head.to_string()];
            for seg in rest.split('[') {
                keys.push(seg.trim_end_matches(']').to_string());
            }
            keys
        }
    }
}

fn tree_insert(node: &mut Value, keys: &[String], leaf: Value) {
    let Some((key, rest)) = keys.split_first() else {
        *node = leaf;
        return;
    };

    if key.is_empty() {
        if !node.is_array() {
            *node = Value::Array(Vec::new());
        }
        let arr = node.as_array_mut().expect("just coerced to array");
        if rest.is_empty() {
            arr.push(leaf);
        } else {
            arr.push(Value::Null);
            let last = arr.last_mut().expect("just pushed");
            tree_insert(last, rest, leaf);
        }
        return;
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let obj = node.as_object_mut().expect("just coerced to object");
    let child = obj.entry(key.clone()).or_insert(Value::Null);
    if rest.is_empty() {
        *child = leaf;
    } else {
        tree_insert(child, rest, leaf);
    }
}
