//! # Message shapes
//!
//! On the wire every message is a JSON object. The gateway treats requests as
//! an opaque [`Message`] map: it checks the credential, stamps `request_id`
//! and `via`, and forwards everything else untouched. The compute node turns
//! the same map into a typed [`ComputeRequest`] at its decode boundary, so an
//! unknown or incomplete shape is classified before any work is dispatched.
//!
//! Field names are kept in [`fields`]; they are part of the protocol and must
//! not change.

use crate::{Error, Result, compute::MAX_FIB_INDEX};
use core::fmt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single decoded line: one JSON object.
pub type Message = Map<String, Value>;

/// Protocol field names.
pub mod fields {
    pub const CHAVE: &str = "chave";
    pub const OPERACAO: &str = "operacao";
    pub const A: &str = "a";
    pub const B: &str = "b";
    pub const N: &str = "n";
    pub const REQUEST_ID: &str = "request_id";
    pub const VIA: &str = "via";
    pub const RESULTADO: &str = "resultado";
    pub const ERRO: &str = "erro";
    pub const ELAPSED_MS: &str = "elapsed_ms";
    pub const MIDDLEWARE_ELAPSED_MS: &str = "middleware_elapsed_ms";
}

/// Provenance stamped by the gateway into every forwarded request.
pub const VIA_GATEWAY: &str = "gateway";

/// `resultado` returned when `divisao` is asked to divide by exactly zero.
pub const DIVISION_BY_ZERO: &str = "error: division by zero";

/// `resultado` returned for an operation tag outside the known set.
pub const INVALID_OPERATION: &str = "invalid operation";

/// Operation tag for Fibonacci.
pub const FIB_TAG: &str = "fib";

/// Opaque identifier correlating a request with its response across hops.
///
/// Caller-assigned ids are carried verbatim, JSON type included: a numeric
/// id comes back as the same number. When a request arrives without one, the
/// receiving tier assigns a fresh ULID string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Value);

impl RequestId {
    /// Generates a fresh, unique identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Value::String(ferroid::id::ULID::now().to_string()))
    }

    /// The identifier as text, if it is a JSON string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    /// Reads the identifier carried by `message`.
    ///
    /// An absent field, `null`, or an empty string all mean "no identifier".
    /// Any other string, number, or boolean is kept as is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMessage`] if `request_id` is an array or an
    /// object.
    pub fn from_message(message: &Message) -> Result<Option<Self>> {
        match message.get(fields::REQUEST_ID) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(id)) if id.is_empty() => Ok(None),
            Some(id @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) => {
                Ok(Some(Self(id.clone())))
            }
            Some(_) => Err(Error::malformed("`request_id` must be a scalar")),
        }
    }

    /// Returns the identifier carried by `message`, assigning and writing
    /// back a fresh one if it has none.
    ///
    /// # Errors
    ///
    /// See [`RequestId::from_message`].
    pub fn resolve(message: &mut Message) -> Result<Self> {
        if let Some(id) = Self::from_message(message)? {
            return Ok(id);
        }
        let id = Self::generate();
        message.insert(fields::REQUEST_ID.to_owned(), id.clone().into());
        Ok(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(id) => f.write_str(id),
            other => write!(f, "{other}"),
        }
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(Value::String(value))
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(Value::from(value))
    }
}

impl From<RequestId> for Value {
    fn from(id: RequestId) -> Self {
        id.0
    }
}

/// The four arithmetic operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithmeticOp {
    Soma,
    Subtracao,
    Multiplicacao,
    Divisao,
}

impl ArithmeticOp {
    /// Wire tag of the operation.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Soma => "soma",
            Self::Subtracao => "subtracao",
            Self::Multiplicacao => "multiplicacao",
            Self::Divisao => "divisao",
        }
    }

    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "soma" => Some(Self::Soma),
            "subtracao" => Some(Self::Subtracao),
            "multiplicacao" => Some(Self::Multiplicacao),
            "divisao" => Some(Self::Divisao),
            _ => None,
        }
    }
}

/// A validated operation, ready for dispatch.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    Arithmetic { op: ArithmeticOp, a: f64, b: f64 },
    Fibonacci { n: i64 },
    /// A tag outside the known set. Answered with [`INVALID_OPERATION`]
    /// rather than rejected.
    Unrecognized { tag: String },
}

impl Operation {
    /// Classifies `message` by its `operacao` tag and checks that the
    /// operands the tag needs are present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMessage`] if `operacao` is missing or not a
    /// string, or if a required operand is missing or has the wrong JSON
    /// type.
    pub fn from_message(message: &Message) -> Result<Self> {
        let tag = match message.get(fields::OPERACAO) {
            Some(Value::String(tag)) => tag,
            None | Some(Value::Null) => return Err(missing(fields::OPERACAO)),
            Some(_) => return Err(Error::malformed("`operacao` must be a string")),
        };

        if let Some(op) = ArithmeticOp::from_tag(tag) {
            return Ok(Self::Arithmetic {
                op,
                a: number(message, fields::A)?,
                b: number(message, fields::B)?,
            });
        }

        if tag == FIB_TAG {
            let n = match message.get(fields::N) {
                None | Some(Value::Null) => return Err(missing(fields::N)),
                Some(value) => match (value.as_i64(), value.as_u64()) {
                    (Some(n), _) => n,
                    // Past `i64::MAX`: a valid integer, just far out of range.
                    (None, Some(n)) => {
                        return Err(Error::invalid_argument(format!(
                            "n must be <= {MAX_FIB_INDEX}, got {n}"
                        )));
                    }
                    (None, None) => return Err(Error::malformed("`n` must be an integer")),
                },
            };
            return Ok(Self::Fibonacci { n });
        }

        Ok(Self::Unrecognized { tag: tag.clone() })
    }

    /// Wire tag of the operation.
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Self::Arithmetic { op, .. } => op.tag(),
            Self::Fibonacci { .. } => FIB_TAG,
            Self::Unrecognized { tag } => tag,
        }
    }
}

fn missing(field: &str) -> Error {
    Error::malformed(format!("missing field `{field}`"))
}

fn number(message: &Message, field: &str) -> Result<f64> {
    match message.get(field) {
        None | Some(Value::Null) => Err(missing(field)),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| Error::malformed(format!("`{field}` must be a number"))),
    }
}

/// A request as seen by the compute node after decoding.
#[derive(Clone, Debug, PartialEq)]
pub struct ComputeRequest {
    pub request_id: RequestId,
    /// Provenance tag, `"gateway"` when relayed. Informational only.
    pub via: Option<String>,
    pub operation: Operation,
}

impl ComputeRequest {
    /// Builds the typed request, assigning a request id if `message` carries
    /// none.
    ///
    /// # Errors
    ///
    /// See [`RequestId::from_message`] and [`Operation::from_message`].
    pub fn from_message(message: &Message) -> Result<Self> {
        let request_id = RequestId::from_message(message)?.unwrap_or_else(RequestId::generate);
        let via = message
            .get(fields::VIA)
            .and_then(Value::as_str)
            .map(str::to_owned);
        let operation = Operation::from_message(message)?;
        Ok(Self {
            request_id,
            via,
            operation,
        })
    }
}

/// The value carried in `resultado`.
///
/// Serialized untagged: arithmetic yields a float, Fibonacci an unsigned
/// integer, and domain warnings a human-readable string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome {
    Integer(u64),
    Number(f64),
    Text(String),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Number(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// A typed response. Absent fields are omitted on the wire.
///
/// `resultado` and `erro` are mutually exclusive for responses built with
/// [`Response::success`] and [`Response::failure`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resultado: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erro: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middleware_elapsed_ms: Option<u64>,
}

impl Response {
    #[must_use]
    pub fn success(request_id: RequestId, resultado: Outcome, elapsed_ms: u64) -> Self {
        Self {
            request_id: Some(request_id),
            resultado: Some(resultado),
            elapsed_ms: Some(elapsed_ms),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failure(request_id: Option<RequestId>, err: &Error) -> Self {
        Self {
            request_id,
            erro: Some(err.to_string()),
            ..Self::default()
        }
    }

    /// Reads a response out of a decoded line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMessage`] if a known field has the wrong
    /// type.
    pub fn from_message(message: Message) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(message))?)
    }
}
