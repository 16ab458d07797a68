use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use keystone_fetch::FetchOptions;
use keystone_store::SharedStore;
use keystone_types::Node;

use crate::call::{options_node, Call, Method};
use crate::error::GateError;

/// The mutable record handlers see for one intercepted call.
///
/// Named parameters of the call (`path`, `key`, `url`, `name`, `value`,
/// `options`, `args`) are typed; any other field name lands in a free-form
/// map that survives until the call completes. Handlers edit the context in
/// place and the operation then runs with whatever the context holds.
pub struct HandlerContext {
    store: SharedStore,
    call: Call,
    key: String,
    fields: BTreeMap<String, Node>,
    response: Option<Node>,
}

impl HandlerContext {
    /// Context for `call`, matched against `key`.
    pub fn new(store: SharedStore, call: Call, key: impl Into<String>) -> Self {
        Self {
            store,
            call,
            key: key.into(),
            fields: BTreeMap::new(),
            response: None,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn method(&self) -> Method {
        self.call.method()
    }

    pub fn call(&self) -> &Call {
        &self.call
    }

    pub fn call_mut(&mut self) -> &mut Call {
        &mut self.call
    }

    /// The resolved key handler patterns were tested against.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Free-form fields set by handlers.
    pub fn extra_fields(&self) -> &BTreeMap<String, Node> {
        &self.fields
    }

    /// The value being written by a `set`, or a handler-defined `value`
    /// field for other calls.
    pub fn value(&self) -> Option<&Node> {
        match &self.call {
            Call::Set(call) => call.value.as_ref(),
            _ => self.fields.get("value"),
        }
    }

    /// Replace the value; `None` turns a `set` into a delete.
    pub fn set_value(&mut self, value: Option<Node>) {
        match &mut self.call {
            Call::Set(call) => call.value = value,
            _ => match value {
                Some(value) => {
                    self.fields.insert("value".to_string(), value);
                }
                None => {
                    self.fields.remove("value");
                }
            },
        }
    }

    /// Read a named or free-form field.
    pub fn field(&self, name: &str) -> Option<Node> {
        match (&self.call, name) {
            (Call::Get(call), "path") => call.path.clone().map(Node::from),
            (Call::Get(call), "options") => Some(options_node(&call.options)),
            (Call::Set(call), "path") => Some(Node::from(call.path.as_str())),
            (Call::Set(call), "value") => call.value.clone(),
            (Call::Set(call), "options") => Some(options_node(&call.options)),
            (Call::Remove(call), "path") => Some(Node::from(call.path.as_str())),
            (Call::Remove(call), "options") => Some(options_node(&call.options)),
            (Call::Fetch(call), "key") => Some(Node::from(call.key.as_str())),
            (Call::Fetch(call), "url") => Some(Node::from(call.url.as_str())),
            (Call::Fetch(call), "options") => Some(options_node(&call.options)),
            (Call::Trigger(call), "name") => Some(Node::from(call.name.as_str())),
            (Call::Trigger(call), "args") => Some(Node::sequence(call.args.iter().cloned())),
            _ => self.fields.get(name).cloned(),
        }
    }

    /// Assign a named or free-form field. Named fields must have the shape
    /// their parameter expects.
    pub fn set_field(&mut self, name: &str, value: Node) -> Result<(), GateError> {
        match (&mut self.call, name) {
            (Call::Get(call), "path") => call.path = optional_string(name, value)?,
            (Call::Get(call), "options") => call.options = options_from(name, &value)?,
            (Call::Set(call), "path") => call.path = string(name, value)?,
            (Call::Set(call), "value") => call.value = Some(value),
            (Call::Set(call), "options") => call.options = options_from(name, &value)?,
            (Call::Remove(call), "path") => call.path = string(name, value)?,
            (Call::Remove(call), "options") => call.options = options_from(name, &value)?,
            (Call::Fetch(call), "key") => call.key = string(name, value)?,
            (Call::Fetch(call), "url") => call.url = string(name, value)?,
            (Call::Fetch(call), "options") => {
                let mut options: FetchOptions = options_from(name, &value)?;
                options.abort = call.options.abort.take();
                call.options = options;
            }
            (Call::Trigger(call), "name") => call.name = string(name, value)?,
            (Call::Trigger(call), "args") => match value {
                Node::Sequence(items) => call.args = Arc::unwrap_or_clone(items),
                other => call.args = vec![other],
            },
            _ => {
                self.fields.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    /// Define `field` as `partial` when absent, or shallow-merge the entries
    /// of `partial` into it when both are mappings. Anything else replaces
    /// the field.
    pub fn merge(&mut self, field: &str, partial: Node) -> Result<(), GateError> {
        let merged = match (self.field(field), partial) {
            (Some(Node::Mapping(existing)), Node::Mapping(partial)) => {
                let mut existing = Arc::unwrap_or_clone(existing);
                existing.extend(partial.iter().map(|(k, v)| (k.clone(), v.clone())));
                Node::Mapping(Arc::new(existing))
            }
            (_, partial) => partial,
        };
        self.set_field(field, merged)
    }

    /// Satisfy the call with `response`; the underlying operation is
    /// skipped and later handlers do not run.
    pub fn respond(&mut self, response: Node) {
        self.response = Some(response);
    }

    pub fn response(&self) -> Option<&Node> {
        self.response.as_ref()
    }

    pub fn is_responded(&self) -> bool {
        self.response.is_some()
    }

    /// Positional arguments reflecting every edit made so far.
    pub fn to_arguments(&self) -> Vec<Node> {
        self.call.to_arguments()
    }

    /// Consume the context, yielding the edited call and any response.
    pub fn into_parts(self) -> (Call, Option<Node>) {
        (self.call, self.response)
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("call", &self.call)
            .field("key", &self.key)
            .field("fields", &self.fields)
            .field("responded", &self.is_responded())
            .finish()
    }
}

fn string(field: &str, value: Node) -> Result<String, GateError> {
    match value {
        Node::String(s) => Ok(s),
        Node::Reference(path) => Ok(path.to_string()),
        other => Err(GateError::field(
            field,
            format!("expected a string, got {}", other.to_json()),
        )),
    }
}

fn optional_string(field: &str, value: Node) -> Result<Option<String>, GateError> {
    match value {
        Node::Null => Ok(None),
        other => string(field, other).map(Some),
    }
}

fn options_from<T: DeserializeOwned>(field: &str, value: &Node) -> Result<T, GateError> {
    serde_json::from_value(value.to_json()).map_err(|e| GateError::field(field, e.to_string()))
}
