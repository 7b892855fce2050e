//! Wire call descriptors.
//!
//! A [`WireCallDescriptor`] is the protocol-level shape of one logical
//! request: which protocol carries it, where it goes, what it sends, and
//! the behavioral flags the executor and reconciler honor. The required
//! core is small (protocol, target, body); everything optional lives in
//! [`CallFlags`] and is set through its builder.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Placeholder tokens left unresolved in a request target, e.g. `{Site.Id}`
/// or `{GraphId}`. Any match fails the pre-flight validation.
static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[A-Za-z][A-Za-z0-9_.]*\}").expect("valid token pattern"));

/// Wire protocol carrying a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// OData `multipart/mixed` REST batch against a per-site endpoint.
    Rest,
    /// JSON Graph batch, v1.0 endpoint.
    Graph,
    /// JSON Graph batch, beta endpoint.
    GraphBeta,
    /// Legacy XML RPC (`ProcessQuery`) batch against a per-site endpoint.
    Csom,
}

/// Coarse grouping used by the protocol splitter: Graph v1.0 and beta
/// requests share one partition and one physical batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolFamily {
    Rest,
    Graph,
    Csom,
}

impl Protocol {
    pub fn family(&self) -> ProtocolFamily {
        match self {
            Protocol::Rest => ProtocolFamily::Rest,
            Protocol::Graph | Protocol::GraphBeta => ProtocolFamily::Graph,
            Protocol::Csom => ProtocolFamily::Csom,
        }
    }

    pub fn is_graph(&self) -> bool {
        self.family() == ProtocolFamily::Graph
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Protocol::Rest => "REST",
            Protocol::Graph => "Graph",
            Protocol::GraphBeta => "GraphBeta",
            Protocol::Csom => "CSOM",
        };
        f.write_str(name)
    }
}

/// One logical CSOM sub-operation: the XML fragments it contributes to the
/// `ProcessQuery` envelope. The `{id}` placeholder in either fragment is
/// substituted with the action id the encoder assigns.
#[derive(Debug, Clone)]
pub struct CsomOperation {
    pub actions: String,
    pub object_paths: String,
}

impl CsomOperation {
    pub fn new(actions: impl Into<String>, object_paths: impl Into<String>) -> Self {
        Self {
            actions: actions.into(),
            object_paths: object_paths.into(),
        }
    }
}

/// Where a wire call goes: a URL for REST/Graph, or a site plus an ordered
/// list of sub-operations for CSOM.
#[derive(Debug, Clone)]
pub enum CallTarget {
    Url(String),
    Csom {
        site_url: String,
        operations: Vec<CsomOperation>,
    },
}

impl CallTarget {
    /// The URL-ish component used for token validation and site splitting.
    pub fn location(&self) -> &str {
        match self {
            CallTarget::Url(url) => url,
            CallTarget::Csom { site_url, .. } => site_url,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            CallTarget::Url(url) => Some(url),
            CallTarget::Csom { .. } => None,
        }
    }
}

/// Optional behavioral flags of a wire call, constructed via builder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallFlags {
    /// Must be sent as a single direct call, never multiplexed.
    pub interactive: bool,
    /// Response body is raw bytes; skip JSON handling.
    pub binary: bool,
    /// Response should be consumed as a stream by the caller.
    pub streaming: bool,
    /// Follow server-side paging links until exhausted.
    pub paged: bool,
    /// A successful response marks the target entity committed.
    pub commit_on_success: bool,
    /// A successful response detaches the target entity from its parent.
    pub remove_from_model: bool,
    /// When loading into a collection, do not clear existing items first.
    pub skip_collection_clear: bool,
}

impl CallFlags {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }
    pub fn binary(mut self) -> Self {
        self.binary = true;
        self
    }
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }
    pub fn paged(mut self) -> Self {
        self.paged = true;
        self
    }
    pub fn commit_on_success(mut self) -> Self {
        self.commit_on_success = true;
        self
    }
    pub fn remove_from_model(mut self) -> Self {
        self.remove_from_model = true;
        self
    }
    pub fn skip_collection_clear(mut self) -> Self {
        self.skip_collection_clear = true;
        self
    }
}

/// Protocol-level description of one logical request.
#[derive(Debug, Clone)]
pub struct WireCallDescriptor {
    pub protocol: Protocol,
    pub target: CallTarget,
    pub body: Option<Value>,
    pub flags: CallFlags,
}

impl WireCallDescriptor {
    pub fn new(protocol: Protocol, url: impl Into<String>) -> Self {
        Self {
            protocol,
            target: CallTarget::Url(url.into()),
            body: None,
            flags: CallFlags::default(),
        }
    }

    pub fn csom(site_url: impl Into<String>, operations: Vec<CsomOperation>) -> Self {
        Self {
            protocol: Protocol::Csom,
            target: CallTarget::Csom {
                site_url: site_url.into(),
                operations,
            },
            body: None,
            flags: CallFlags::default(),
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_flags(mut self, flags: CallFlags) -> Self {
        self.flags = flags;
        self
    }

    /// True when the target still carries `{token}` placeholders that were
    /// never substituted. Such a descriptor must not reach the wire.
    pub fn has_unresolved_tokens(&self) -> bool {
        TOKEN_PATTERN.is_match(self.target.location())
    }
}
