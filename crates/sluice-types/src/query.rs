//! Query request types: descriptor, index filter and bin projection.

use serde::{Deserialize, Serialize};

use crate::{NodeId, QueryPolicy, Record, Value};

/// Secondary-index predicate. A query without a filter is a full scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Bin equals the given value.
    Equal {
        /// Indexed bin name.
        bin: String,
        /// Value to match.
        value: Value,
    },
    /// Integer bin within `[begin, end]`.
    Range {
        /// Indexed bin name.
        bin: String,
        /// Inclusive lower bound.
        begin: i64,
        /// Inclusive upper bound.
        end: i64,
    },
}

impl Filter {
    /// Equality filter on `bin`.
    pub fn equal(bin: &str, value: impl Into<Value>) -> Self {
        Filter::Equal {
            bin: bin.to_string(),
            value: value.into(),
        }
    }

    /// Inclusive integer range filter on `bin`.
    pub fn range(bin: &str, begin: i64, end: i64) -> Self {
        Filter::Range {
            bin: bin.to_string(),
            begin,
            end,
        }
    }

    /// Evaluate the filter against a record's bins.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::Equal { bin, value } => record.bin(bin) == Some(value),
            Filter::Range { bin, begin, end } => record
                .bin(bin)
                .and_then(Value::as_int)
                .is_some_and(|v| *begin <= v && v <= *end),
        }
    }
}

/// Which bins a query returns.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BinProjection {
    /// Every bin.
    #[default]
    All,
    /// Only the named bins.
    Named(Vec<String>),
    /// No bins: digest and user key only.
    KeysOnly,
}

impl BinProjection {
    /// Narrow a record's bins to this projection.
    pub fn apply(&self, record: &mut Record) {
        match self {
            BinProjection::All => {}
            BinProjection::Named(names) => record.bins.retain(|k, _| names.contains(k)),
            BinProjection::KeysOnly => record.bins.clear(),
        }
    }
}

/// An immutable query request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    /// Namespace to query.
    pub namespace: String,
    /// Set within the namespace. Empty string queries every set.
    pub set: String,
    /// Index predicate, `None` for a full scan.
    pub filter: Option<Filter>,
    /// Bins to return.
    pub bins: BinProjection,
    /// Explicit target nodes. `None` targets every node serving the namespace.
    pub nodes: Option<Vec<NodeId>>,
}

impl QueryDescriptor {
    /// Full scan of `namespace`/`set` returning all bins from every node.
    pub fn new(namespace: &str, set: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            set: set.to_string(),
            filter: None,
            bins: BinProjection::All,
            nodes: None,
        }
    }

    /// Restrict the query with an index filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Return only the given bins.
    pub fn with_bins(mut self, bins: &[&str]) -> Self {
        self.bins = BinProjection::Named(bins.iter().map(|b| b.to_string()).collect());
        self
    }

    /// Query only the given nodes.
    pub fn on_nodes(mut self, nodes: Vec<NodeId>) -> Self {
        self.nodes = Some(nodes);
        self
    }

    /// The projection actually sent to nodes under `policy`.
    pub fn effective_projection(&self, policy: &QueryPolicy) -> BinProjection {
        if policy.include_bin_data {
            self.bins.clone()
        } else {
            BinProjection::KeysOnly
        }
    }

    /// Whether `record` satisfies this descriptor's set and filter.
    pub fn selects(&self, record: &Record) -> bool {
        if record.key.namespace != self.namespace {
            return false;
        }
        if !self.set.is_empty() && record.key.set != self.set {
            return false;
        }
        self.filter.as_ref().is_none_or(|f| f.matches(record))
    }
}
