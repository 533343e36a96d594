//! Command grammar
//!
//! Three command forms travel from the coordinator to a peer:
//!
//! ```text
//! CALL,<method>,(<tag> <literal>,)*     tag: int | sint | bool | sbool
//! TUN,<tunnel>,get|take
//! __EOC__
//! ```
//!
//! Names and literals are ASCII alphanumeric and never contain commas.

use std::fmt;
use thiserror::Error;

use super::value::{parse_bool, parse_int, TypedValue, ValueKind};

/// Token that ends a session
pub const END_OF_SESSION: &str = "__EOC__";

const CALL_TAG: &str = "CALL";
const TUNNEL_TAG: &str = "TUN";

/// Grammar errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Malformed command: '{0}'")]
    MalformedCommand(String),

    #[error("Malformed typed reply: '{0}'")]
    MalformedReply(String),
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Argument type tag as written on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    Int,
    SignedInt,
    Bool,
    SignedBool,
}

impl ArgKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "int" => Some(ArgKind::Int),
            "sint" => Some(ArgKind::SignedInt),
            "bool" => Some(ArgKind::Bool),
            "sbool" => Some(ArgKind::SignedBool),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ArgKind::Int => "int",
            ArgKind::SignedInt => "sint",
            ArgKind::Bool => "bool",
            ArgKind::SignedBool => "sbool",
        }
    }

    /// Tag for a value kind, `sint`/`sbool` when the value is secure
    pub fn for_value(kind: ValueKind, secure: bool) -> Self {
        match (kind, secure) {
            (ValueKind::Int, false) => ArgKind::Int,
            (ValueKind::Int, true) => ArgKind::SignedInt,
            (ValueKind::Bool, false) => ArgKind::Bool,
            (ValueKind::Bool, true) => ArgKind::SignedBool,
        }
    }

    /// Whether the tag marks a secure value
    pub fn is_secure(&self) -> bool {
        matches!(self, ArgKind::SignedInt | ArgKind::SignedBool)
    }

    /// The value kind this tag decodes to; signedness is dropped
    pub fn value_kind(&self) -> ValueKind {
        match self {
            ArgKind::Int | ArgKind::SignedInt => ValueKind::Int,
            ArgKind::Bool | ArgKind::SignedBool => ValueKind::Bool,
        }
    }

    fn decode(&self, literal: &str) -> Option<TypedValue> {
        match self.value_kind() {
            ValueKind::Int => parse_int(literal).map(TypedValue::Int),
            ValueKind::Bool => Some(TypedValue::Bool(parse_bool(literal))),
        }
    }
}

/// One decoded argument of a remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedArg {
    pub kind: ArgKind,
    pub value: TypedValue,
}

impl TypedArg {
    pub fn new(kind: ArgKind, value: TypedValue) -> Self {
        Self { kind, value }
    }

    /// Argument tagged `sint`/`sbool`
    pub fn secure(value: impl Into<TypedValue>) -> Self {
        let value = value.into();
        Self::new(ArgKind::for_value(value.kind(), true), value)
    }

    pub fn is_secure(&self) -> bool {
        self.kind.is_secure()
    }
}

impl From<TypedValue> for TypedArg {
    fn from(value: TypedValue) -> Self {
        Self::new(ArgKind::for_value(value.kind(), false), value)
    }
}

/// Remote tunnel operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelOp {
    Get,
    Take,
}

impl TunnelOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelOp::Get => "get",
            TunnelOp::Take => "take",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "get" => Some(TunnelOp::Get),
            "take" => Some(TunnelOp::Take),
            _ => None,
        }
    }
}

impl fmt::Display for TunnelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Call a registered method on the peer
    Invoke { method: String, args: Vec<TypedArg> },
    /// Read a tunnel on the peer
    Tunnel { name: String, op: TunnelOp },
    /// End of computation
    EndOfSession,
}

impl Command {
    /// Build an invoke command from plain values, tagged `int`/`bool`
    pub fn invoke(method: impl Into<String>, args: &[TypedValue]) -> Self {
        let args: Vec<TypedArg> = args.iter().copied().map(TypedArg::from).collect();
        Self::invoke_tagged(method, &args)
    }

    /// Build an invoke command keeping each argument's tag
    pub fn invoke_tagged(method: impl Into<String>, args: &[TypedArg]) -> Self {
        Command::Invoke {
            method: method.into(),
            args: args.to_vec(),
        }
    }

    pub fn tunnel(name: impl Into<String>, op: TunnelOp) -> Self {
        Command::Tunnel {
            name: name.into(),
            op,
        }
    }

    /// Parse one command line
    pub fn parse(text: &str) -> CommandResult<Self> {
        if text == END_OF_SESSION {
            return Ok(Command::EndOfSession);
        }

        let malformed = || CommandError::MalformedCommand(text.to_string());

        let (tag, rest) = text.split_once(',').ok_or_else(malformed)?;
        match tag {
            CALL_TAG => parse_invoke(rest).ok_or_else(malformed),
            TUNNEL_TAG => parse_tunnel(rest).ok_or_else(malformed),
            _ => Err(malformed()),
        }
    }

    /// Encode into the wire grammar
    pub fn encode(&self) -> String {
        match self {
            Command::Invoke { method, args } => {
                let mut out = format!("{},{},", CALL_TAG, method);
                for arg in args {
                    out.push_str(arg.kind.tag());
                    out.push(' ');
                    out.push_str(&arg.value.literal());
                    out.push(',');
                }
                out
            }
            Command::Tunnel { name, op } => format!("{},{},{}", TUNNEL_TAG, name, op),
            Command::EndOfSession => END_OF_SESSION.to_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn is_name(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

fn is_literal(s: &str) -> bool {
    is_name(s.strip_prefix('-').unwrap_or(s))
}

/// `<method>,(<tag> <literal>,)*`
fn parse_invoke(rest: &str) -> Option<Command> {
    let (method, mut tail) = rest.split_once(',')?;
    if !is_name(method) {
        return None;
    }

    let mut args = Vec::new();
    while !tail.is_empty() {
        let (field, next) = tail.split_once(',')?;
        let (tag, literal) = field.split_once(' ')?;
        let kind = ArgKind::from_tag(tag)?;
        if !is_literal(literal) {
            return None;
        }
        args.push(TypedArg::new(kind, kind.decode(literal)?));
        tail = next;
    }

    Some(Command::Invoke {
        method: method.to_string(),
        args,
    })
}

/// `<tunnel>,get|take`
fn parse_tunnel(rest: &str) -> Option<Command> {
    let (name, op) = rest.split_once(',')?;
    if !is_name(name) {
        return None;
    }
    Some(Command::Tunnel {
        name: name.to_string(),
        op: TunnelOp::from_token(op)?,
    })
}
