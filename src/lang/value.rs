//! Tagged score-language values and the operator table.
//!
//! Lists, maps, structs, and functions are shared by reference (`Rc`);
//! assignment aliases them. Strings are immutable. Cycles are not
//! expressible in the surface language, so plain reference counting is
//! enough.

use std::any::Any;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::{error, warn};

use super::ast::FunctionValue;
use super::symbol::StructInstance;
use crate::error::Result;
use crate::host::HostInterface;

/// Binary operators of the score language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Plus,
    Minus,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Plus => "+",
            BinOp::Minus => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
        }
    }

    /// Operators where `float OP list` cannot be commuted to `list OP float`.
    pub(crate) fn is_asymmetric(&self) -> bool {
        matches!(self, BinOp::Minus | BinOp::Div | BinOp::Mod | BinOp::Pow)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
}

impl RelOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            RelOp::Equal => "==",
            RelOp::NotEqual => "!=",
            RelOp::Less => "<",
            RelOp::Greater => ">",
            RelOp::LessEqual => "<=",
            RelOp::GreaterEqual => ">=",
        }
    }
}

/// Type tag carried by every [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Void,
    Float,
    String,
    Handle,
    List,
    Map,
    Struct,
    Function,
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Void => "void",
            ValueType::Float => "float",
            ValueType::String => "string",
            ValueType::Handle => "handle",
            ValueType::List => "list",
            ValueType::Map => "map",
            ValueType::Struct => "struct",
            ValueType::Function => "function",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ValueType::Void => 0,
            ValueType::Float => 1,
            ValueType::String => 2,
            ValueType::Handle => 3,
            ValueType::List => 4,
            ValueType::Map => 5,
            ValueType::Struct => 6,
            ValueType::Function => 7,
        }
    }
}

/// Opaque pointer to an externally owned signal object.
///
/// The core never looks inside; arithmetic on handles is delegated to the
/// host. Equality is identity.
#[derive(Clone)]
pub struct Handle(pub Rc<dyn Any>);

impl Handle {
    pub fn new<T: Any>(inner: T) -> Self {
        Handle(Rc::new(inner))
    }

    pub fn ptr_eq(&self, other: &Handle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle:{:p}", Rc::as_ptr(&self.0))
    }
}

/// Shared list storage.
pub type ListRef = Rc<RefCell<Vec<Value>>>;

/// Shared map storage with deterministic key ordering.
pub type MapRef = Rc<RefCell<BTreeMap<MapKey, Value>>>;

/// A score-language value.
#[derive(Clone)]
pub enum Value {
    Void,
    Float(f64),
    String(Rc<str>),
    Handle(Handle),
    List(ListRef),
    Map(MapRef),
    Struct(Rc<StructInstance>),
    Function(Rc<FunctionValue>),
}

/// Why a typed comparison could not be carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareError {
    /// The operands have different type tags.
    Mismatched,
    /// Ordering is undefined for this type (only floats and strings order).
    Unorderable,
}

impl Value {
    pub fn new_list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn new_map() -> Value {
        Value::Map(Rc::new(RefCell::new(BTreeMap::new())))
    }

    pub fn string(s: &str) -> Value {
        Value::String(Rc::from(s))
    }

    pub fn data_type(&self) -> ValueType {
        match self {
            Value::Void => ValueType::Void,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::Handle(_) => ValueType::Handle,
            Value::List(_) => ValueType::List,
            Value::Map(_) => ValueType::Map,
            Value::Struct(_) => ValueType::Struct,
            Value::Function(_) => ValueType::Function,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.data_type().name()
    }

    /// Default value for a declared type: the "typed zero" copied into
    /// defaulted function arguments and fresh declarations.
    pub fn default_of(ty: ValueType) -> Value {
        match ty {
            ValueType::Float => Value::Float(0.0),
            ValueType::String => Value::string(""),
            ValueType::List => Value::new_list(Vec::new()),
            ValueType::Map => Value::new_map(),
            _ => Value::Void,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListRef> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Truthiness used by `if`/`while`/`and`/`or`/`not`.
    pub fn is_true(&self) -> bool {
        match self {
            Value::Void => false,
            Value::Float(v) => *v != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Handle(_) => true,
            Value::List(l) => !l.borrow().is_empty(),
            Value::Map(m) => !m.borrow().is_empty(),
            Value::Struct(_) => true,
            Value::Function(_) => true,
        }
    }

    /// Typed equality. Lists and maps compare element-wise; handles,
    /// structs, and functions compare by identity. Mismatched tags are an
    /// error for the caller to report.
    pub fn try_eq(&self, other: &Value) -> std::result::Result<bool, CompareError> {
        if self.data_type() != other.data_type() {
            return Err(CompareError::Mismatched);
        }
        Ok(match (self, other) {
            (Value::Void, Value::Void) => false, // void never equals anything
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Handle(a), Value::Handle(b)) => a.ptr_eq(b),
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    true
                } else {
                    let (a, b) = (a.borrow(), b.borrow());
                    a.len() == b.len()
                        && a.iter().zip(b.iter()).all(|(x, y)| x.try_eq(y).unwrap_or(false))
                }
            }
            (Value::Map(a), Value::Map(b)) => {
                Rc::ptr_eq(a, b) || {
                    let (a, b) = (a.borrow(), b.borrow());
                    a.len() == b.len()
                        && a.iter().zip(b.iter()).all(|((ka, va), (kb, vb))| {
                            ka == kb && va.try_eq(vb).unwrap_or(false)
                        })
                }
            }
            (Value::Struct(a), Value::Struct(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => unreachable!("tags already matched"),
        })
    }

    /// Typed ordering; defined only for floats and strings.
    pub fn try_cmp(&self, other: &Value) -> std::result::Result<Ordering, CompareError> {
        if self.data_type() != other.data_type() {
            return Err(CompareError::Mismatched);
        }
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => Ok(a.total_cmp(b)),
            (Value::String(a), Value::String(b)) => Ok(a.as_ref().cmp(b.as_ref())),
            _ => Err(CompareError::Unorderable),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "(void)"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "\"{s}\""),
            Value::Handle(h) => write!(f, "{h:?}"),
            Value::List(l) => write!(f, "{:?}", l.borrow()),
            Value::Map(m) => write!(f, "map[{}]", m.borrow().len()),
            Value::Struct(s) => write!(f, "struct {}", s.type_name()),
            Value::Function(_) => write!(f, "function"),
        }
    }
}

/// Map key wrapper giving [`Value`] the total order a `BTreeMap` needs.
///
/// Keys order by type rank first, then by content for floats and strings
/// and by allocation identity for reference types. The ordering is
/// deterministic within a run, which is all the map iteration order
/// promises.
#[derive(Clone, Debug)]
pub struct MapKey(pub Value);

impl Ord for MapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (&self.0, &other.0);
        let by_rank = a.data_type().rank().cmp(&b.data_type().rank());
        if by_rank != Ordering::Equal {
            return by_rank;
        }
        match (a, b) {
            (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
            (Value::String(x), Value::String(y)) => x.as_ref().cmp(y.as_ref()),
            (Value::Handle(x), Value::Handle(y)) => {
                (Rc::as_ptr(&x.0) as *const () as usize).cmp(&(Rc::as_ptr(&y.0) as *const () as usize))
            }
            (Value::List(x), Value::List(y)) => (Rc::as_ptr(x) as usize).cmp(&(Rc::as_ptr(y) as usize)),
            (Value::Map(x), Value::Map(y)) => (Rc::as_ptr(x) as usize).cmp(&(Rc::as_ptr(y) as usize)),
            (Value::Struct(x), Value::Struct(y)) => {
                (Rc::as_ptr(x) as *const () as usize).cmp(&(Rc::as_ptr(y) as *const () as usize))
            }
            (Value::Function(x), Value::Function(y)) => {
                (Rc::as_ptr(x) as *const () as usize).cmp(&(Rc::as_ptr(y) as *const () as usize))
            }
            _ => Ordering::Equal, // both void
        }
    }
}

impl PartialOrd for MapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MapKey {}

/// `%g`-style float formatting with `sig` significant digits.
pub(crate) fn format_g(v: f64, sig: usize) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    if !v.is_finite() {
        return v.to_string();
    }
    let sig = sig.max(1);
    let sci = format!("{:.*e}", sig - 1, v);
    let (mantissa, exp) = sci.split_once('e').expect("exponential format");
    let exp: i32 = exp.parse().expect("exponent");
    if exp < -4 || exp >= sig as i32 {
        let mantissa = trim_trailing_zeros(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    } else {
        let decimals = (sig as i32 - 1 - exp).max(0) as usize;
        trim_trailing_zeros(&format!("{:.*}", decimals, v))
    }
}

fn trim_trailing_zeros(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

fn float_mod(lhs: f64, rhs: f64) -> f64 {
    if rhs > -1.0 && rhs < 1.0 {
        error!("illegal value for RHS of a modulo operation");
        return 0.0;
    }
    ((lhs as i64) % (rhs as i64)) as f64
}

fn float_div(lhs: f64, rhs: f64) -> f64 {
    if rhs == 0.0 {
        error!("division by zero");
        return 0.0;
    }
    lhs / rhs
}

fn op_floats(lhs: f64, rhs: f64, op: BinOp) -> f64 {
    match op {
        BinOp::Plus => lhs + rhs,
        BinOp::Minus => lhs - rhs,
        BinOp::Mul => lhs * rhs,
        BinOp::Div => float_div(lhs, rhs),
        BinOp::Mod => float_mod(lhs, rhs),
        BinOp::Pow => lhs.powf(rhs),
    }
}

fn op_strings(lhs: &str, rhs: &str, op: BinOp) -> Value {
    match op {
        BinOp::Plus => Value::String(Rc::from(format!("{lhs}{rhs}"))),
        _ => {
            warn!("operator {}: invalid operator for two strings", op.symbol());
            Value::string("")
        }
    }
}

/// Element-wise `list OP scalar`, elements first in the equation.
/// Non-float elements pass through unchanged.
fn op_list_float(list: &ListRef, val: f64, op: BinOp) -> Value {
    let src = list.borrow();
    let dest: Vec<Value> = src
        .iter()
        .map(|elem| match elem {
            Value::Float(e) => Value::Float(op_floats(*e, val, op)),
            other => other.clone(),
        })
        .collect();
    Value::new_list(dest)
}

/// Element-wise `scalar OP list` for the asymmetric operators.
fn op_float_list(val: f64, list: &ListRef, op: BinOp) -> Value {
    let src = list.borrow();
    let dest: Vec<Value> = src
        .iter()
        .map(|elem| match elem {
            Value::Float(e) => Value::Float(op_floats(val, *e, op)),
            other => other.clone(),
        })
        .collect();
    Value::new_list(dest)
}

fn op_lists(lhs: &ListRef, rhs: &ListRef, op: BinOp) -> Value {
    match op {
        BinOp::Plus => {
            let mut dest = lhs.borrow().clone();
            dest.extend(rhs.borrow().iter().cloned());
            Value::new_list(dest)
        }
        _ => {
            warn!("operator {}: invalid operator for two lists", op.symbol());
            Value::new_list(Vec::new())
        }
    }
}

/// Apply a binary operator, producing a fresh value.
///
/// Handle arithmetic is delegated to the host; every other mismatch warns
/// and yields a safe value so evaluation can continue.
pub fn apply_binary(
    host: &mut dyn HostInterface,
    lhs: &Value,
    rhs: &Value,
    op: BinOp,
) -> Result<Value> {
    let result = match (lhs, rhs) {
        (Value::Float(a), Value::Float(b)) => Value::Float(op_floats(*a, *b, op)),
        (Value::Float(a), Value::String(b)) => op_strings(&format_g(*a, 6), b, op),
        (Value::String(a), Value::Float(b)) => op_strings(a, &format_g(*b, 6), op),
        (Value::String(a), Value::String(b)) => op_strings(a, b, op),
        (Value::Float(a), Value::List(b)) => {
            if op.is_asymmetric() {
                op_float_list(*a, b, op)
            } else {
                op_list_float(b, *a, op)
            }
        }
        (Value::List(a), Value::Float(b)) => op_list_float(a, *b, op),
        (Value::List(a), Value::List(b)) => op_lists(a, b, op),
        (Value::Handle(a), Value::Float(b)) => Value::Handle(host.handle_op_float(a, *b, op)?),
        (Value::Float(a), Value::Handle(b)) => Value::Handle(host.float_op_handle(*a, b, op)?),
        (Value::Handle(a), Value::Handle(b)) => Value::Handle(host.handle_op_handle(a, b, op)?),
        _ => {
            warn!(
                "operator {}: can't operate on {} and {}",
                op.symbol(),
                lhs.type_name(),
                rhs.type_name()
            );
            Value::Float(0.0)
        }
    };
    Ok(result)
}

/// Apply a unary operator.
pub fn apply_unary(host: &mut dyn HostInterface, operand: &Value, op: UnOp) -> Result<Value> {
    let UnOp::Neg = op;
    let result = match operand {
        Value::Float(v) => Value::Float(-v),
        Value::List(l) => op_list_float(l, -1.0, BinOp::Mul),
        Value::Handle(h) => Value::Handle(host.handle_op_float(h, -1.0, BinOp::Mul)?),
        other => {
            warn!("operator -: can't negate a {}", other.type_name());
            Value::Float(0.0)
        }
    };
    Ok(result)
}

/// Evaluate a comparison, yielding 1.0 or 0.0.
///
/// Mismatched or unorderable operand types warn and yield false.
pub fn apply_relation(lhs: &Value, rhs: &Value, op: RelOp) -> Value {
    let outcome = match op {
        RelOp::Equal => lhs.try_eq(rhs),
        RelOp::NotEqual => lhs.try_eq(rhs).map(|eq| !eq),
        RelOp::Less => lhs.try_cmp(rhs).map(Ordering::is_lt),
        RelOp::Greater => lhs.try_cmp(rhs).map(Ordering::is_gt),
        RelOp::LessEqual => lhs.try_cmp(rhs).map(Ordering::is_le),
        RelOp::GreaterEqual => lhs.try_cmp(rhs).map(Ordering::is_ge),
    };
    match outcome {
        Ok(truth) => Value::Float(if truth { 1.0 } else { 0.0 }),
        Err(CompareError::Mismatched) => {
            warn!(
                "operator {}: attempt to compare values of different types - returning false",
                op.symbol()
            );
            Value::Float(0.0)
        }
        Err(CompareError::Unorderable) => {
            warn!(
                "operator {}: cannot compare values of this type - returning false",
                op.symbol()
            );
            Value::Float(0.0)
        }
    }
}
