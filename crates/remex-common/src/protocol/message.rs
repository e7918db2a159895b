use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::error::Result;
use crate::protocol::value::Value;

/// Pairs a request with its reply on one connection.
///
/// Ids only need to be unique among the requests a client still has pending;
/// random v4 ids make collisions practically impossible anyway.
pub type CorrelationId = Uuid;

/// Version byte written into every payload envelope.
pub const PAYLOAD_VERSION: u8 = 1;

/// A request for the receiving side to execute against its local engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    FunctionCall { name: String, args: Vec<Value> },
    DictGet { key: Value },
    DictSet { key: Value, value: Value },
    RawEval { expression: Value },
}

impl Command {
    pub fn call(name: impl Into<String>, args: Vec<Value>) -> Self {
        Command::FunctionCall {
            name: name.into(),
            args,
        }
    }

    pub fn get(key: impl Into<Value>) -> Self {
        Command::DictGet { key: key.into() }
    }

    pub fn set(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        Command::DictSet {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn eval(expression: impl Into<Value>) -> Self {
        Command::RawEval {
            expression: expression.into(),
        }
    }

    /// Builds the command an engine value stands for.
    ///
    /// A list whose first element is a symbol is a call of that symbol with
    /// the remaining elements as arguments. Everything else, including a list
    /// that merely contains symbols further in, is evaluated as is.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::List(items) => {
                let mut items = items.into_iter();
                match items.next() {
                    Some(Value::Symbol(name)) => Command::FunctionCall {
                        name,
                        args: items.collect(),
                    },
                    head => Command::RawEval {
                        expression: Value::List(head.into_iter().chain(items).collect()),
                    },
                }
            }
            expression => Command::RawEval { expression },
        }
    }

    /// Checks every value the command carries with [`Value::validate`].
    pub fn validate(&self) -> Result<()> {
        match self {
            Command::FunctionCall { args, .. } => args.iter().try_for_each(Value::validate),
            Command::DictGet { key } => key.validate(),
            Command::DictSet { key, value } => {
                key.validate()?;
                value.validate()
            }
            Command::RawEval { expression } => expression.validate(),
        }
    }

    /// Short label used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::FunctionCall { .. } => "function_call",
            Command::DictGet { .. } => "dict_get",
            Command::DictSet { .. } => "dict_set",
            Command::RawEval { .. } => "raw_eval",
        }
    }
}

/// What a frame carries: a command to run, or a plain value (usually a reply).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Payload {
    Command(Command),
    Value(Value),
}

impl Payload {
    /// Interprets the payload as something to execute.
    ///
    /// Plain values that arrive on an unmatched id go through
    /// [`Command::from_value`].
    pub fn into_command(self) -> Command {
        match self {
            Payload::Command(command) => command,
            Payload::Value(value) => Command::from_value(value),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Payload::Command(command) => command.validate(),
            Payload::Value(value) => value.validate(),
        }
    }
}

impl From<Command> for Payload {
    fn from(command: Command) -> Self {
        Payload::Command(command)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Value(value)
    }
}
