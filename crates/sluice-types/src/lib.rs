//! Shared types and identifiers for Sluice.
//!
//! This crate defines the core types used across the Sluice workspace:
//! identifiers ([`NodeId`], [`Digest`], [`ClusterGeneration`]),
//! the record model ([`Key`], [`Value`], [`Record`]),
//! query requests ([`QueryDescriptor`], [`Filter`], [`BinProjection`]),
//! and the query configuration surface ([`QueryPolicy`]).

mod policy;
mod query;

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use policy::{DEFAULT_RECORD_QUEUE_SIZE, PolicyError, QueryPolicy};
pub use query::{BinProjection, Filter, QueryDescriptor};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name([u8; $len]);

        impl $name {
            /// Create an ID by hashing arbitrary data with BLAKE3.
            pub fn from_data(data: &[u8]) -> Self {
                let hash = blake3::hash(data);
                let mut out = [0u8; $len];
                out.copy_from_slice(&hash.as_bytes()[..$len]);
                Self(out)
            }

            /// Return the raw byte representation.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // First 8 hex chars are plenty to tell nodes apart in logs.
                let hex = self.to_string();
                write!(f, "{}({})", stringify!($name), &hex[..8])
            }
        }
    };
}

define_id!(
    /// Identifier for a cluster node.
    NodeId,
    32
);

define_id!(
    /// Record digest: `blake3(set || user_key)` truncated to 20 bytes.
    ///
    /// Identifies a record on the server even when the user key is not stored.
    Digest,
    20
);

impl Digest {
    /// Compute the digest of a record key within a set.
    pub fn compute(set: &str, user_key: &Value) -> Self {
        let mut buf = Vec::with_capacity(set.len() + 16);
        buf.extend_from_slice(set.as_bytes());
        buf.push(0);
        user_key.write_key_bytes(&mut buf);
        Self::from_data(&buf)
    }
}

// ---------------------------------------------------------------------------
// Cluster generation
// ---------------------------------------------------------------------------

/// Version token of the cluster topology.
///
/// Changes whenever membership changes. The query engine only compares
/// generations for equality; the numeric value is opaque.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterGeneration(u64);

impl ClusterGeneration {
    /// The generation of a freshly created topology.
    pub const INITIAL: Self = Self(0);

    /// Wrap a raw generation number.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The generation that follows this one.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for ClusterGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

impl fmt::Debug for ClusterGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClusterGeneration({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Record model
// ---------------------------------------------------------------------------

/// A bin or key value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value.
    Nil,
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Opaque bytes.
    Blob(Bytes),
}

impl Value {
    /// Return the integer payload, if this is an [`Value::Int`].
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    fn write_key_bytes(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Nil => buf.push(0),
            Value::Int(v) => {
                buf.push(1);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            Value::Float(v) => {
                buf.push(2);
                buf.extend_from_slice(&v.to_bits().to_be_bytes());
            }
            Value::Str(s) => {
                buf.push(3);
                buf.extend_from_slice(s.as_bytes());
            }
            Value::Blob(b) => {
                buf.push(4);
                buf.extend_from_slice(b);
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Blob(v)
    }
}

/// Address of a record: namespace, set, optional user key and digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    /// Namespace the record lives in.
    pub namespace: String,
    /// Set within the namespace.
    pub set: String,
    /// User key, present only if the server stores it.
    pub user_key: Option<Value>,
    /// Digest of `(set, user_key)`.
    pub digest: Digest,
}

impl Key {
    /// Build a key that carries its user key.
    pub fn new(namespace: &str, set: &str, user_key: impl Into<Value>) -> Self {
        let user_key = user_key.into();
        Self {
            namespace: namespace.to_string(),
            set: set.to_string(),
            digest: Digest::compute(set, &user_key),
            user_key: Some(user_key),
        }
    }
}

/// A record returned by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record address.
    pub key: Key,
    /// Bin name → value. Empty when bin data was not requested.
    pub bins: BTreeMap<String, Value>,
    /// Server-side record generation (write count).
    pub generation: u32,
    /// Expiration time in server epoch seconds (0 = never).
    pub expiration: u32,
}

impl Record {
    /// Create a record with the given bins.
    pub fn new(key: Key, bins: BTreeMap<String, Value>) -> Self {
        Self {
            key,
            bins,
            generation: 1,
            expiration: 0,
        }
    }

    /// Whether any bin payload is attached.
    pub fn has_bin_data(&self) -> bool {
        !self.bins.is_empty()
    }

    /// Look up a bin by name.
    pub fn bin(&self, name: &str) -> Option<&Value> {
        self.bins.get(name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
