use std::fmt;

use keystone_fetch::FetchOptions;
use keystone_store::{GetOptions, SetOptions};
use keystone_types::Node;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Method
// ---------------------------------------------------------------------------

/// The public operations handlers can intercept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Set,
    Remove,
    Fetch,
    Trigger,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Set => "set",
            Method::Remove => "remove",
            Method::Fetch => "fetch",
            Method::Trigger => "trigger",
        }
    }

    /// Formal parameter names, in positional order. The last name of
    /// `trigger` is the rest parameter.
    pub fn parameters(&self) -> &'static [&'static str] {
        match self {
            Method::Get => &["path", "options"],
            Method::Set => &["path", "value", "options"],
            Method::Remove => &["path", "options"],
            Method::Fetch => &["key", "url", "options"],
            Method::Trigger => &["name", "args"],
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Per-operation arguments
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GetCall {
    /// `None` reads the whole tree.
    pub path: Option<String>,
    pub options: GetOptions,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SetCall {
    pub path: String,
    /// `None` deletes.
    pub value: Option<Node>,
    pub options: SetOptions,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemoveCall {
    pub path: String,
    pub options: SetOptions,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchCall {
    pub key: String,
    pub url: String,
    pub options: FetchOptions,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TriggerCall {
    pub name: String,
    /// Trailing arguments handed to the action.
    pub args: Vec<Node>,
}

/// One intercepted call with its typed arguments.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Get(GetCall),
    Set(SetCall),
    Remove(RemoveCall),
    Fetch(FetchCall),
    Trigger(TriggerCall),
}

impl Call {
    pub fn get(path: Option<&str>, options: GetOptions) -> Self {
        Call::Get(GetCall {
            path: path.map(str::to_string),
            options,
        })
    }

    pub fn set(path: &str, value: Option<Node>, options: SetOptions) -> Self {
        Call::Set(SetCall {
            path: path.to_string(),
            value,
            options,
        })
    }

    pub fn remove(path: &str, options: SetOptions) -> Self {
        Call::Remove(RemoveCall {
            path: path.to_string(),
            options,
        })
    }

    pub fn fetch(key: &str, url: &str, options: FetchOptions) -> Self {
        Call::Fetch(FetchCall {
            key: key.to_string(),
            url: url.to_string(),
            options,
        })
    }

    pub fn trigger(name: &str, args: Vec<Node>) -> Self {
        Call::Trigger(TriggerCall {
            name: name.to_string(),
            args,
        })
    }

    pub fn method(&self) -> Method {
        match self {
            Call::Get(_) => Method::Get,
            Call::Set(_) => Method::Set,
            Call::Remove(_) => Method::Remove,
            Call::Fetch(_) => Method::Fetch,
            Call::Trigger(_) => Method::Trigger,
        }
    }

    /// The string handler patterns are tested against before resolution:
    /// the path, the fetch key, or the action name.
    pub fn target(&self) -> &str {
        match self {
            Call::Get(call) => call.path.as_deref().unwrap_or_default(),
            Call::Set(call) => &call.path,
            Call::Remove(call) => &call.path,
            Call::Fetch(call) => &call.key,
            Call::Trigger(call) => &call.name,
        }
    }

    /// Positional arguments in formal parameter order, with trailing
    /// action arguments spread. Undefined values become `Null`.
    pub fn to_arguments(&self) -> Vec<Node> {
        match self {
            Call::Get(call) => vec![
                call.path.clone().map(Node::from).unwrap_or_default(),
                options_node(&call.options),
            ],
            Call::Set(call) => vec![
                Node::from(call.path.as_str()),
                call.value.clone().unwrap_or_default(),
                options_node(&call.options),
            ],
            Call::Remove(call) => vec![Node::from(call.path.as_str()), options_node(&call.options)],
            Call::Fetch(call) => vec![
                Node::from(call.key.as_str()),
                Node::from(call.url.as_str()),
                options_node(&call.options),
            ],
            Call::Trigger(call) => std::iter::once(Node::from(call.name.as_str()))
                .chain(call.args.iter().cloned())
                .collect(),
        }
    }
}

/// Render an options struct as a mapping node.
pub(crate) fn options_node<T: Serialize>(options: &T) -> Node {
    serde_json::to_value(options)
        .map(Node::from_json)
        .unwrap_or_else(|_| Node::empty_mapping())
}
