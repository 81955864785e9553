use bytes::Bytes;

/// Identifier of a lease.
pub type LeaseId = i64;

/// A granted lease.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Lease {
    /// The lease ID.
    pub id: LeaseId,

    /// The TTL in seconds the lease was granted with.
    pub ttl: i64,
}

/// A stored key-value pair with its revision metadata.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyValue {
    /// The key.
    pub key: Bytes,

    /// The value.
    pub value: Bytes,

    /// Revision of the last creation of this key.
    pub create_revision: i64,

    /// Revision of the last modification of this key.
    pub mod_revision: i64,

    /// Number of modifications since creation.
    pub version: i64,

    /// Lease attached to the key, if any.
    pub lease: Option<LeaseId>,
}

/// Comparison operator of a [`Compare`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareOp {
    /// `actual == expected`
    Equal,

    /// `actual > expected`
    Greater,

    /// `actual < expected`
    Less,

    /// `actual != expected`
    NotEqual,
}

impl CompareOp {
    /// Applies the operator to `actual` and `expected`.
    #[must_use]
    pub const fn evaluate(self, actual: i64, expected: i64) -> bool {
        match self {
            Self::Equal => actual == expected,
            Self::Greater => actual > expected,
            Self::Less => actual < expected,
            Self::NotEqual => actual != expected,
        }
    }
}

/// The key metadata a [`Compare`] inspects. Absent keys read as zero.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareTarget {
    /// The key's creation revision.
    CreateRevision,

    /// The key's last modification revision.
    ModRevision,

    /// The key's version.
    Version,
}

/// A transaction precondition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Compare {
    /// The key to inspect.
    pub key: Bytes,

    /// The metadata to inspect.
    pub target: CompareTarget,

    /// The operator.
    pub op: CompareOp,

    /// The value to compare against.
    pub value: i64,
}

impl Compare {
    /// Compares the creation revision of `key`.
    ///
    /// `create_revision(key, CompareOp::Equal, 0)` holds iff the key does not
    /// exist; `create_revision(key, CompareOp::Greater, 0)` holds iff it does.
    pub fn create_revision(key: impl Into<Bytes>, op: CompareOp, value: i64) -> Self {
        Self {
            key: key.into(),
            target: CompareTarget::CreateRevision,
            op,
            value,
        }
    }

    /// Evaluates the precondition against the current state of its key.
    #[must_use]
    pub fn evaluate(&self, current: Option<&KeyValue>) -> bool {
        let actual = current.map_or(0, |kv| match self.target {
            CompareTarget::CreateRevision => kv.create_revision,
            CompareTarget::ModRevision => kv.mod_revision,
            CompareTarget::Version => kv.version,
        });

        self.op.evaluate(actual, self.value)
    }
}

/// An operation executed inside a transaction branch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RequestOp {
    /// Write `value` to `key`, optionally attached to a lease.
    Put {
        /// The key.
        key: Bytes,
        /// The value.
        value: Bytes,
        /// Lease to attach the key to.
        lease: Option<LeaseId>,
    },

    /// Read `key`.
    Range {
        /// The key.
        key: Bytes,
    },

    /// Delete `key`.
    DeleteRange {
        /// The key.
        key: Bytes,
    },
}

/// Result of a [`RequestOp`], in the same position as its request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResponseOp {
    /// Result of [`RequestOp::Put`].
    Put,

    /// Result of [`RequestOp::Range`].
    Range {
        /// Matching key-value pairs; empty if the key does not exist.
        kvs: Vec<KeyValue>,
    },

    /// Result of [`RequestOp::DeleteRange`].
    DeleteRange {
        /// Number of deleted keys.
        deleted: i64,
    },
}

impl ResponseOp {
    /// The key-value pairs of a range response, `None` for other responses.
    #[must_use]
    pub fn range_kvs(&self) -> Option<&[KeyValue]> {
        match self {
            Self::Range { kvs } => Some(kvs),
            _ => None,
        }
    }
}

/// A compare-and-swap transaction.
///
/// If every compare holds, the `success` operations run, otherwise the
/// `failure` operations run. Either way the whole transaction is applied
/// atomically.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TxnRequest {
    /// Preconditions, all of which must hold.
    pub compare: Vec<Compare>,

    /// Operations to run if every precondition holds.
    pub success: Vec<RequestOp>,

    /// Operations to run otherwise.
    pub failure: Vec<RequestOp>,
}

impl TxnRequest {
    /// The number of operations in the larger branch.
    #[must_use]
    pub fn max_branch_ops(&self) -> usize {
        self.success.len().max(self.failure.len())
    }
}

/// Outcome of a transaction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TxnResponse {
    /// Whether every precondition held and the success branch ran.
    pub succeeded: bool,

    /// Store revision after the transaction.
    pub revision: i64,

    /// One response per operation of the branch that ran.
    pub responses: Vec<ResponseOp>,
}
