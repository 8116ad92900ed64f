//! Pin and signal model.
//!
//! A [`Signal`] is what a pin carries: a digital level, a bounded analog
//! reading, a serial byte stream, or one of the two net sentinels
//! ([`Signal::Floating`] when nothing drives a net, [`Signal::Conflict`] when
//! drivers disagree). A [`Value`] is the typed scalar used for state
//! variables and rule literals.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A typed scalar: state variable contents, rule literals, expression results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// UTF-8 string
    Str(String),
}

impl Value {
    /// Converts a JSON scalar. Returns `None` for null, arrays and objects.
    pub fn from_json(value: &serde_json::Value) -> Option<Value> {
        match value {
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Value::Int(i)),
                None => n.as_f64().map(Value::Float),
            },
            serde_json::Value::String(s) => Some(Value::Str(s.clone())),
            _ => None,
        }
    }

    /// Returns the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
        }
    }

    /// Numeric view of ints and floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Boolean view; only `Bool` values qualify.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Equality with int/float promotion.
    pub fn loose_eq(&self, other: &Value) -> bool {
        matches!(self.loose_cmp(other), Some(Ordering::Equal))
    }

    /// Ordering between compatible kinds. Ints and floats compare numerically,
    /// booleans as `false < true`, strings lexically.
    pub fn loose_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => {
                let (a, b) = (self.as_f64()?, other.as_f64()?);
                a.partial_cmp(&b)
            }
        }
    }

    /// Applies a comparison operator.
    ///
    /// `eq`/`ne` are defined for every pair (different kinds are unequal);
    /// ordering operators return `None` for incomparable kinds.
    pub fn compare(&self, op: CompareOp, other: &Value) -> Option<bool> {
        match (op, self.loose_cmp(other)) {
            (CompareOp::Eq, ord) => Some(ord == Some(Ordering::Equal)),
            (CompareOp::Ne, ord) => Some(ord != Some(Ordering::Equal)),
            (_, Some(ord)) => Some(op.test(ord)),
            (_, None) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

/// Declared type of a state variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Boolean
    Bool,
    /// Integer
    Int,
    /// Float
    Float,
    /// String
    Str,
}

impl ValueKind {
    /// Coerces a value into this kind. Ints widen to floats; nothing else converts.
    pub fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ValueKind::Float, Value::Int(i)) => Some(Value::Float(*i as f64)),
            (kind, v) if v.kind() == kind => Some(v.clone()),
            _ => None,
        }
    }

    /// Human readable name, as used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "string",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Comparison operator for `state_compare` / `pin_compare` triggers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// ==
    Eq,
    /// !=
    Ne,
    /// <
    Lt,
    /// <=
    Le,
    /// >
    Gt,
    /// >=
    Ge,
}

impl CompareOp {
    /// Tests an ordering against this operator.
    pub fn test(self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        }
    }
}

/// The value carried by a pin or resolved for a net.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Signal {
    /// Digital level (high = true)
    Digital(bool),
    /// Analog reading within the pin's declared range
    Analog(f64),
    /// Serial byte stream
    Bytes(Vec<u8>),
    /// Not driven
    Floating,
    /// Drivers on the net disagree
    Conflict,
}

impl Signal {
    /// Digital high.
    pub const HIGH: Signal = Signal::Digital(true);
    /// Digital low.
    pub const LOW: Signal = Signal::Digital(false);

    /// Returns true for [`Signal::Floating`].
    pub fn is_floating(&self) -> bool {
        matches!(self, Signal::Floating)
    }

    /// Returns true for [`Signal::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, Signal::Conflict)
    }

    /// The domain of a concrete signal; sentinels have none.
    pub fn domain(&self) -> Option<SignalDomain> {
        match self {
            Signal::Digital(_) => Some(SignalDomain::Digital),
            Signal::Analog(_) => Some(SignalDomain::Analog),
            Signal::Bytes(_) => Some(SignalDomain::Serial),
            Signal::Floating | Signal::Conflict => None,
        }
    }

    /// Numeric view: digital levels read as 0/1.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Signal::Digital(b) => Some(if *b { 1.0 } else { 0.0 }),
            Signal::Analog(x) => Some(*x),
            _ => None,
        }
    }

    /// Converts to a [`Value`] for expression evaluation.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Signal::Digital(b) => Some(Value::Bool(*b)),
            Signal::Analog(x) => Some(Value::Float(*x)),
            Signal::Bytes(bytes) => Some(Value::Str(String::from_utf8_lossy(bytes).into_owned())),
            Signal::Floating | Signal::Conflict => None,
        }
    }

    /// Tests this signal against a rule literal.
    ///
    /// Digital levels match booleans and 0/1, analog readings match numbers,
    /// byte streams match strings. Sentinels never match.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Signal::Digital(level), Value::Bool(b)) => level == b,
            (Signal::Digital(level), Value::Int(i)) => (*i == 1 && *level) || (*i == 0 && !*level),
            (Signal::Analog(x), v) => v.as_f64().map_or(false, |y| *x == y),
            (Signal::Bytes(bytes), Value::Str(s)) => bytes.as_slice() == s.as_bytes(),
            _ => false,
        }
    }

    /// Single-character rendering: `1`, `0`, `~` (analog), `s` (serial), `Z`, `X`.
    pub fn to_char(&self) -> char {
        match self {
            Signal::Digital(true) => '1',
            Signal::Digital(false) => '0',
            Signal::Analog(_) => '~',
            Signal::Bytes(_) => 's',
            Signal::Floating => 'Z',
            Signal::Conflict => 'X',
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Digital(true) => f.write_str("HIGH"),
            Signal::Digital(false) => f.write_str("LOW"),
            Signal::Analog(x) => write!(f, "{}", x),
            Signal::Bytes(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
            Signal::Floating => f.write_str("Z"),
            Signal::Conflict => f.write_str("X"),
        }
    }
}

/// Declared electrical type of a pin, as written in `.adev` files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinType {
    #[serde(rename = "digital")]
    Digital,
    #[serde(rename = "analog")]
    Analog,
    #[serde(rename = "power")]
    Power,
    #[serde(rename = "ground")]
    Ground,
    #[serde(rename = "signal")]
    Signal,
    #[serde(rename = "passive")]
    Passive,
    #[serde(rename = "i2c_sda")]
    I2cSda,
    #[serde(rename = "i2c_scl")]
    I2cScl,
    #[serde(rename = "spi_mosi")]
    SpiMosi,
    #[serde(rename = "spi_miso")]
    SpiMiso,
    #[serde(rename = "spi_sck")]
    SpiSck,
    #[serde(rename = "serial_tx")]
    SerialTx,
    #[serde(rename = "serial_rx")]
    SerialRx,
}

impl PinType {
    /// The signal domain this pin type belongs to.
    pub fn domain(self) -> SignalDomain {
        match self {
            PinType::Digital
            | PinType::Signal
            | PinType::I2cSda
            | PinType::I2cScl
            | PinType::SpiMosi
            | PinType::SpiMiso
            | PinType::SpiSck => SignalDomain::Digital,
            PinType::Analog => SignalDomain::Analog,
            PinType::SerialTx | PinType::SerialRx => SignalDomain::Serial,
            PinType::Power | PinType::Ground | PinType::Passive => SignalDomain::Carrier,
        }
    }
}

/// Compatibility class of pins; a net holds at most one non-carrier domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalDomain {
    /// Logic levels
    Digital,
    /// Bounded numeric readings
    Analog,
    /// Byte streams
    Serial,
    /// Untyped carriers (power, ground, passive); join any net
    Carrier,
}

impl SignalDomain {
    /// Value a net of this domain resolves to when nothing drives it.
    pub fn undriven(self) -> Signal {
        match self {
            SignalDomain::Analog => Signal::Analog(0.0),
            _ => Signal::Floating,
        }
    }

    /// Returns true if a pin of this domain may hold `signal`.
    pub fn accepts(self, signal: &Signal) -> bool {
        match (self, signal.domain()) {
            (_, None) => true,
            (SignalDomain::Carrier, Some(SignalDomain::Digital | SignalDomain::Analog)) => true,
            (domain, Some(other)) => domain == other,
        }
    }

    /// Converts a signal driven by a carrier pin into this domain.
    ///
    /// Rail voltages read as logic levels on digital nets (above zero is
    /// high) and logic levels read as 0/1 on analog nets. Returns `None` for
    /// signals this domain cannot carry.
    pub fn coerce(self, signal: &Signal) -> Option<Signal> {
        if self.accepts(signal) {
            return Some(signal.clone());
        }
        match (self, signal) {
            (SignalDomain::Digital, Signal::Analog(v)) => Some(Signal::Digital(*v > 0.0)),
            (SignalDomain::Analog, Signal::Digital(_)) => signal.as_number().map(Signal::Analog),
            _ => None,
        }
    }

    /// Converts a rule literal into a signal of this domain.
    ///
    /// The string `"z"` releases the pin for every domain except serial.
    pub fn convert(self, value: &Value, range: AnalogRange) -> Option<Signal> {
        if self != SignalDomain::Serial {
            if let Value::Str(s) = value {
                if s.eq_ignore_ascii_case("z") {
                    return Some(Signal::Floating);
                }
            }
        }
        match (self, value) {
            (SignalDomain::Digital | SignalDomain::Carrier, Value::Bool(b)) => Some(Signal::Digital(*b)),
            (SignalDomain::Digital, Value::Int(0)) => Some(Signal::LOW),
            (SignalDomain::Digital, Value::Int(1)) => Some(Signal::HIGH),
            (SignalDomain::Analog | SignalDomain::Carrier, v) => v
                .as_f64()
                .filter(|x| range.contains(*x))
                .map(Signal::Analog),
            (SignalDomain::Serial, Value::Str(s)) => Some(Signal::Bytes(s.clone().into_bytes())),
            _ => None,
        }
    }
}

impl fmt::Display for SignalDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalDomain::Digital => "digital",
            SignalDomain::Analog => "analog",
            SignalDomain::Serial => "serial",
            SignalDomain::Carrier => "carrier",
        };
        f.write_str(name)
    }
}

/// Inclusive bounds of an analog pin. Serialized as `[min, max]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct AnalogRange {
    /// Lower bound
    pub min: f64,
    /// Upper bound
    pub max: f64,
}

impl AnalogRange {
    /// 10-bit ADC range, 0..=1023.
    pub const ADC10: AnalogRange = AnalogRange { min: 0.0, max: 1023.0 };

    /// Returns true if `x` is finite and within bounds.
    pub fn contains(&self, x: f64) -> bool {
        x.is_finite() && x >= self.min && x <= self.max
    }
}

impl Default for AnalogRange {
    fn default() -> Self {
        Self::ADC10
    }
}

impl From<[f64; 2]> for AnalogRange {
    fn from([min, max]: [f64; 2]) -> Self {
        Self { min, max }
    }
}

impl From<AnalogRange> for [f64; 2] {
    fn from(range: AnalogRange) -> Self {
        [range.min, range.max]
    }
}

/// Write authority of a pin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinDirection {
    /// Written only by net propagation
    #[serde(alias = "in")]
    Input,
    /// Written only by the owning device
    #[serde(alias = "out")]
    Output,
    /// Written by both; the device's own value wins within a tick
    #[default]
    #[serde(alias = "io", alias = "inout")]
    Bidirectional,
}

impl PinDirection {
    /// The owning device (rules, sketch) may write this pin.
    pub fn device_writable(self) -> bool {
        !matches!(self, PinDirection::Input)
    }

    /// Net propagation may write this pin.
    pub fn net_writable(self) -> bool {
        !matches!(self, PinDirection::Output)
    }
}

impl fmt::Display for PinDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PinDirection::Input => "input",
            PinDirection::Output => "output",
            PinDirection::Bidirectional => "bidirectional",
        };
        f.write_str(name)
    }
}

/// Resistor pull declared on a pin; decides the level of an undriven digital net.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pull {
    /// Pulled high
    Up,
    /// Pulled low
    Down,
}

impl Pull {
    /// The level an undriven net settles to.
    pub fn level(self) -> Signal {
        Signal::Digital(matches!(self, Pull::Up))
    }
}
