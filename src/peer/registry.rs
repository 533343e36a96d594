//! Method registry for dispatching remote calls by name.
//!
//! Every remotely callable method is registered at setup time together with
//! the value kinds it expects. Calls to names that were never registered are
//! rejected.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = MethodRegistry::new();
//! registry.register("ping", &[ValueKind::Int], |tunnels, args| {
//!     tunnels.get_mut("score").map(|t| t.put(args[0]));
//!     Ok(())
//! });
//! ```

use std::collections::HashMap;
use std::fmt;

use super::{PeerError, PeerResult};
use crate::protocol::{TypedArg, TypedValue, ValueKind};
use crate::session::TunnelSet;

/// Result type for handler functions.
pub type HandlerResult = PeerResult<()>;

/// Boxed handler: mutable access to the peer's tunnels plus decoded arguments.
pub type MethodHandler = Box<dyn Fn(&mut TunnelSet, &[TypedValue]) -> HandlerResult + Send + Sync>;

struct RegisteredMethod {
    params: Vec<ValueKind>,
    handler: MethodHandler,
}

/// Name to handler mapping for one peer.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, RegisteredMethod>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any handler with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, params: &[ValueKind], handler: F)
    where
        F: Fn(&mut TunnelSet, &[TypedValue]) -> HandlerResult + Send + Sync + 'static,
    {
        let name = name.into();
        if self.contains(&name) {
            tracing::warn!("Replacing handler for method '{}'", name);
        }
        tracing::debug!(method = %name, arity = params.len(), "registered method");
        self.methods.insert(
            name,
            RegisteredMethod {
                params: params.to_vec(),
                handler: Box::new(handler),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Check the arguments against the registered signature, then call.
    pub fn call(&self, name: &str, tunnels: &mut TunnelSet, args: &[TypedArg]) -> HandlerResult {
        let method = self
            .methods
            .get(name)
            .ok_or_else(|| PeerError::UnknownMethod(name.to_string()))?;

        let values: Vec<TypedValue> = args.iter().map(|a| a.value).collect();
        let kinds: Vec<ValueKind> = values.iter().map(TypedValue::kind).collect();
        if kinds != method.params {
            return Err(PeerError::ArgumentMismatch {
                method: name.to_string(),
                expected: Signature(method.params.clone()).to_string(),
                actual: Signature(kinds).to_string(),
            });
        }

        (method.handler)(tunnels, &values)
    }
}

/// Display helper: `(int, bool)`
struct Signature(Vec<ValueKind>);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, kind) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", kind)?;
        }
        f.write_str(")")
    }
}
