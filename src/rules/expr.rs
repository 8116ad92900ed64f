//! Value expressions used by `set_state`, `set_pin` and `set_led` actions.
//!
//! ```json
//! {"op": "add", "lhs": {"state": "count"}, "rhs": 1}
//! ```
//!
//! Leaves are literals, state variables, pins and properties. Int/float
//! arithmetic promotes to float; `add` also concatenates strings.

use serde::{Deserialize, Serialize};

use crate::error::ActionError;
use crate::signal::{CompareOp, Signal, Value};

/// A side-effect-free expression over one instance's state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expr {
    /// Current value of a state variable
    State { state: String },
    /// Current value of a pin
    Pin { pin: String },
    /// A static descriptor property
    Prop { prop: String },
    /// Unary operation
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// Binary operation
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Literal value
    Literal(Value),
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    fn compare_op(self) -> Option<CompareOp> {
        match self {
            BinaryOp::Eq => Some(CompareOp::Eq),
            BinaryOp::Ne => Some(CompareOp::Ne),
            BinaryOp::Lt => Some(CompareOp::Lt),
            BinaryOp::Le => Some(CompareOp::Le),
            BinaryOp::Gt => Some(CompareOp::Gt),
            BinaryOp::Ge => Some(CompareOp::Ge),
            _ => None,
        }
    }
}

/// A name an expression reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExprRef<'a> {
    State(&'a str),
    Pin(&'a str),
    Prop(&'a str),
}

/// Read access to the values an expression may reference.
pub trait ExprScope {
    /// Current value of a state variable.
    fn state(&self, name: &str) -> Option<Value>;
    /// Current value of a pin.
    fn pin(&self, pin: &str) -> Option<Signal>;
    /// A static property.
    fn prop(&self, name: &str) -> Option<Value>;
}

impl Expr {
    /// Returns the literal if this expression is one.
    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Expr::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// Calls `visit` for every name this expression reads.
    pub fn visit_refs<'a>(&'a self, visit: &mut dyn FnMut(ExprRef<'a>)) {
        match self {
            Expr::State { state } => visit(ExprRef::State(state)),
            Expr::Pin { pin } => visit(ExprRef::Pin(pin)),
            Expr::Prop { prop } => visit(ExprRef::Prop(prop)),
            Expr::Unary { operand, .. } => operand.visit_refs(visit),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.visit_refs(visit);
                rhs.visit_refs(visit);
            }
            Expr::Literal(_) => {}
        }
    }

    /// Evaluates the expression.
    pub fn eval(&self, scope: &dyn ExprScope) -> Result<Value, ActionError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::State { state } => scope
                .state(state)
                .ok_or_else(|| ActionError::UnknownStateVar(state.clone())),
            Expr::Pin { pin } => {
                let signal = scope
                    .pin(pin)
                    .ok_or_else(|| ActionError::UnknownPin(pin.clone()))?;
                signal
                    .to_value()
                    .ok_or_else(|| ActionError::Eval(format!("pin '{}' reads {}", pin, signal)))
            }
            Expr::Prop { prop } => scope
                .prop(prop)
                .ok_or_else(|| ActionError::Eval(format!("unknown property '{}'", prop))),
            Expr::Unary { op, operand } => unary(*op, operand.eval(scope)?),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = lhs.eval(scope)?;
                // and/or short-circuit
                match (op, &lhs) {
                    (BinaryOp::And, Value::Bool(false)) => return Ok(Value::Bool(false)),
                    (BinaryOp::Or, Value::Bool(true)) => return Ok(Value::Bool(true)),
                    _ => {}
                }
                binary(*op, lhs, rhs.eval(scope)?)
            }
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, ActionError> {
    match (op, value) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| ActionError::Eval("integer overflow".to_string())),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (op, value) => Err(ActionError::Eval(format!("cannot apply {:?} to {}", op, value))),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, ActionError> {
    if let Some(cmp) = op.compare_op() {
        return lhs
            .compare(cmp, &rhs)
            .map(Value::Bool)
            .ok_or_else(|| mismatch(op, &lhs, &rhs));
    }

    match (op, &lhs, &rhs) {
        (BinaryOp::And | BinaryOp::Or, Value::Bool(_), Value::Bool(b)) => Ok(Value::Bool(*b)),
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
        (_, Value::Int(a), Value::Int(b)) => int_arith(op, *a, *b),
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => match float_arith(op, a, b) {
                Some(x) if x.is_finite() => Ok(Value::Float(x)),
                Some(_) => Err(ActionError::Eval("non-finite result".to_string())),
                None => Err(mismatch(op, &lhs, &rhs)),
            },
            _ => Err(mismatch(op, &lhs, &rhs)),
        },
    }
}

fn int_arith(op: BinaryOp, a: i64, b: i64) -> Result<Value, ActionError> {
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div if b == 0 => return Err(ActionError::Eval("division by zero".to_string())),
        BinaryOp::Div => a.checked_div(b),
        BinaryOp::Min => Some(a.min(b)),
        BinaryOp::Max => Some(a.max(b)),
        _ => {
            return Err(ActionError::Eval(format!("cannot apply {:?} to integers", op)));
        }
    };
    result
        .map(Value::Int)
        .ok_or_else(|| ActionError::Eval("integer overflow".to_string()))
}

fn float_arith(op: BinaryOp, a: f64, b: f64) -> Option<f64> {
    let x = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b == 0.0 => return None,
        BinaryOp::Div => a / b,
        BinaryOp::Min => a.min(b),
        BinaryOp::Max => a.max(b),
        _ => return None,
    };
    Some(x)
}

fn mismatch(op: BinaryOp, lhs: &Value, rhs: &Value) -> ActionError {
    if op == BinaryOp::Div && rhs.as_f64() == Some(0.0) {
        return ActionError::Eval("division by zero".to_string());
    }
    ActionError::Eval(format!("cannot apply {:?} to {} and {}", op, lhs, rhs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Scope {
        state: HashMap<&'static str, Value>,
        pins: HashMap<&'static str, Signal>,
    }

    impl ExprScope for Scope {
        fn state(&self, name: &str) -> Option<Value> {
            self.state.get(name).cloned()
        }
        fn pin(&self, pin: &str) -> Option<Signal> {
            self.pins.get(pin).cloned()
        }
        fn prop(&self, name: &str) -> Option<Value> {
            (name == "threshold").then_some(Value::Int(512))
        }
    }

    fn scope() -> Scope {
        Scope {
            state: HashMap::from([("count", Value::Int(4)), ("on", Value::Bool(true))]),
            pins: HashMap::from([("A0", Signal::Analog(700.0)), ("D2", Signal::Floating)]),
        }
    }

    fn parse(json: serde_json::Value) -> Expr {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_parse_shapes() {
        assert_eq!(parse(serde_json::json!(3)), Expr::Literal(Value::Int(3)));
        assert_eq!(parse(serde_json::json!({"state": "on"})), Expr::State { state: "on".into() });
        assert!(matches!(
            parse(serde_json::json!({"op": "not", "operand": {"state": "on"}})),
            Expr::Unary { op: UnaryOp::Not, .. }
        ));
        assert!(matches!(
            parse(serde_json::json!({"op": "add", "lhs": 1, "rhs": 2})),
            Expr::Binary { op: BinaryOp::Add, .. }
        ));
    }

    #[test]
    fn test_arithmetic() {
        let s = scope();
        let e = parse(serde_json::json!({"op": "add", "lhs": {"state": "count"}, "rhs": 1}));
        assert_eq!(e.eval(&s).unwrap(), Value::Int(5));

        let e = parse(serde_json::json!({"op": "mul", "lhs": {"state": "count"}, "rhs": 0.5}));
        assert_eq!(e.eval(&s).unwrap(), Value::Float(2.0));

        let e = parse(serde_json::json!({"op": "div", "lhs": 1, "rhs": 0}));
        assert_eq!(e.eval(&s).unwrap_err(), ActionError::Eval("division by zero".to_string()));
    }

    #[test]
    fn test_non_finite_float_is_error() {
        let s = scope();
        let huge = serde_json::json!({"op": "mul", "lhs": 1e308, "rhs": 10});
        let e = parse(serde_json::json!({"op": "sub", "lhs": huge.clone(), "rhs": huge.clone()}));
        assert_eq!(e.eval(&s).unwrap_err(), ActionError::Eval("non-finite result".to_string()));
        assert_eq!(parse(huge).eval(&s).unwrap_err(), ActionError::Eval("non-finite result".to_string()));

        let e = parse(serde_json::json!({"op": "max", "lhs": 1e308, "rhs": {"pin": "A0"}}));
        assert_eq!(e.eval(&s).unwrap(), Value::Float(1e308));
    }

    #[test]
    fn test_comparison_and_logic() {
        let s = scope();
        let e = parse(serde_json::json!({"op": "gt", "lhs": {"pin": "A0"}, "rhs": {"prop": "threshold"}}));
        assert_eq!(e.eval(&s).unwrap(), Value::Bool(true));

        let e = parse(serde_json::json!({
            "op": "and",
            "lhs": {"op": "not", "operand": {"state": "on"}},
            "rhs": {"pin": "D2"}
        }));
        // Short-circuits before reading the floating pin
        assert_eq!(e.eval(&s).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_floating_pin_is_error() {
        let e = parse(serde_json::json!({"pin": "D2"}));
        assert!(matches!(e.eval(&scope()), Err(ActionError::Eval(_))));
    }

    #[test]
    fn test_visit_refs() {
        let e = parse(serde_json::json!({"op": "max", "lhs": {"state": "count"}, "rhs": {"pin": "A0"}}));
        let mut refs = Vec::new();
        e.visit_refs(&mut |r| refs.push(r));
        assert_eq!(refs, vec![ExprRef::State("count"), ExprRef::Pin("A0")]);
    }
}
