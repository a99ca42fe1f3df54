//! Tree-walking interpreter for the score language.
//!
//! Evaluation is a recursive walk returning `Eval<Value>`; a `return`
//! statement travels as [`Interrupt::Return`] and is caught by the
//! enclosing call. Fatal diagnostics travel as [`Interrupt::Fatal`] and
//! abort the score pass.

use std::io::Write;
use std::rc::Rc;

use tracing::warn;

use super::ast::{AssignOp, FunctionValue, Node, NodeKind};
use super::builtins;
use super::symbol::{
    mangled_method_name, name_from_mangled, LookupMode, SymbolRef, SymbolTable,
};
use super::value::{self, MapKey, Value, ValueType};
use crate::error::{Error, Result};
use crate::host::{HostCall, HostInterface};
use crate::options::PrintLevel;

/// Cap on nested list literals and function-call argument frames.
pub const MAX_STACK_DEPTH: usize = 64;

/// Cap on elements in one list literal or argument list.
pub const MAX_LIST_ITEMS: usize = 1024;

/// Nonlocal control transfer out of an evaluation.
pub enum Interrupt {
    /// A `return` statement in flight; caught by the enclosing call.
    Return(Value),
    /// A fatal diagnostic; aborts the score pass.
    Fatal(Error),
}

impl From<Error> for Interrupt {
    fn from(e: Error) -> Interrupt {
        Interrupt::Fatal(e)
    }
}

pub type Eval<T> = std::result::Result<T, Interrupt>;

/// The evaluator. One per score pass.
///
/// The implicit context the evaluation needs (`this` receivers, the names
/// of active calls, frame depth) lives here rather than in globals.
pub struct Interpreter<'h> {
    pub(super) symbols: SymbolTable,
    host: &'h mut dyn HostInterface,
    pub(super) out: Box<dyn Write>,
    pub(super) print_level: PrintLevel,
    pub(super) print_list_limit: usize,
    /// Receivers deposited by `MemberAccess`, consumed by the next `Call`.
    this_stack: Vec<Value>,
    /// Names of actively executing functions, innermost last.
    called_functions: Vec<Rc<str>>,
    frame_depth: usize,
    call_depth: usize,
    in_function_arg_list: bool,
    pub(super) warn_defaulted_args: bool,
    line: u32,
    file: Option<Rc<str>>,
}

impl<'h> Interpreter<'h> {
    pub fn new(host: &'h mut dyn HostInterface) -> Interpreter<'h> {
        Interpreter {
            symbols: SymbolTable::new(),
            host,
            out: Box::new(std::io::stdout()),
            print_level: PrintLevel::All,
            print_list_limit: crate::options::DEFAULT_PRINT_LIST_LIMIT,
            this_stack: Vec::new(),
            called_functions: Vec::new(),
            frame_depth: 0,
            call_depth: 0,
            in_function_arg_list: false,
            warn_defaulted_args: true,
            line: 0,
            file: None,
        }
    }

    /// Redirect builtin print output (default: stdout).
    pub fn with_output(mut self, out: Box<dyn Write>) -> Self {
        self.out = out;
        self
    }

    pub fn set_print_level(&mut self, level: PrintLevel) {
        self.print_level = level;
    }

    pub fn set_print_list_limit(&mut self, limit: usize) {
        self.print_list_limit = limit;
    }

    /// Suppress the "arg not provided - defaulting" warnings.
    pub fn suppress_defaulted_arg_warnings(&mut self) {
        self.warn_defaulted_args = false;
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Depth of actively executing user-function calls.
    pub fn call_depth(&self) -> usize {
        self.call_depth
    }

    /// Evaluate a root node. A `return` with no enclosing call is fatal.
    pub fn eval_root(&mut self, node: &Node) -> Result<Value> {
        match self.eval(node) {
            Ok(v) => Ok(v),
            Err(Interrupt::Return(_)) => {
                Err(Error::Script(self.position_message("return statement outside a function")))
            }
            Err(Interrupt::Fatal(e)) => Err(e),
        }
    }

    /// Look a symbol's current value up, mainly for tests and hosts.
    pub fn symbol_value(&self, name: &str) -> Option<Value> {
        self.symbols
            .lookup(name, LookupMode::AnyLevel)
            .map(|s| s.borrow().value().clone())
    }

    fn position_message(&self, msg: &str) -> String {
        match &self.file {
            Some(file) => format!("{file}:{}: {msg}", self.line),
            None if self.line > 0 => format!("line {}: {msg}", self.line),
            None => msg.to_string(),
        }
    }

    pub(super) fn fatal(&self, msg: impl AsRef<str>) -> Interrupt {
        Interrupt::Fatal(Error::Script(self.position_message(msg.as_ref())))
    }

    fn push_frame(&mut self) -> Eval<()> {
        self.frame_depth += 1;
        if self.frame_depth > MAX_STACK_DEPTH {
            return Err(self.fatal("stack overflow: too many nested list levels or function calls"));
        }
        Ok(())
    }

    fn pop_frame(&mut self) {
        self.frame_depth -= 1;
    }

    fn current_function(&self) -> &str {
        self.called_functions
            .last()
            .map(|n| name_from_mangled(n))
            .unwrap_or("<score>")
    }

    pub(super) fn eval(&mut self, node: &Node) -> Eval<Value> {
        if node.line > 0 {
            self.line = node.line;
        }
        if node.file.is_some() {
            self.file = node.file.clone();
        }
        match &node.kind {
            NodeKind::Noop => Ok(Value::Void),
            NodeKind::Constf(v) => Ok(Value::Float(*v)),
            NodeKind::String(s) => Ok(Value::String(s.clone())),

            NodeKind::LoadSym(name) => match self.symbols.lookup(name, LookupMode::AnyLevel) {
                Some(sym) => Ok(sym.borrow().value().clone()),
                None => Err(self.fatal(format!("'{name}' is not declared"))),
            },
            NodeKind::AutoDeclLoadSym(name) => {
                let in_call = self.symbols.in_function_call();
                let sym = self.symbols.lookup_or_autodeclare(name, in_call);
                let value = sym.borrow().value().clone();
                Ok(value)
            }
            NodeKind::LoadFuncSym(name) => match self.symbols.lookup(name, LookupMode::AnyLevel) {
                Some(sym) => Ok(sym.borrow().value().clone()),
                // No such symbol: keep the bare name so the call site can
                // still dispatch a builtin or host function.
                None => Ok(Value::String(name.clone())),
            },

            NodeKind::List(elems) => {
                self.push_frame()?;
                let result = self.eval_value_list(elems);
                self.pop_frame();
                Ok(Value::new_list(result?))
            }

            NodeKind::SubscriptRead { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                self.subscript_read(&target, &index)
            }
            NodeKind::SubscriptWrite { target, index, value } => {
                let sym = self.eval_lvalue(target)?;
                let index = self.eval(index)?;
                let value = self.eval(value)?;
                self.subscript_write(&sym, &index, value.clone())?;
                Ok(value)
            }

            NodeKind::MemberAccess { target, member } => {
                let object = self.eval(target)?;
                self.member_access(&object, member)
            }

            NodeKind::Store { lhs, rhs, allow_type_overwrite } => {
                // RHS first, then the LHS symbol.
                let value = self.eval(rhs)?;
                let sym = self.eval_lvalue(lhs)?;
                self.store_value(&sym, value.clone(), *allow_type_overwrite)?;
                Ok(value)
            }
            NodeKind::OpAssign { target, value, op } => {
                let sym = self.eval_lvalue(target)?;
                let rhs = self.eval(value)?;
                self.op_assign(&sym, &rhs, *op)
            }

            NodeKind::Operator { lhs, rhs, op } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                Ok(value::apply_binary(self.host, &lhs, &rhs, *op)?)
            }
            NodeKind::UnaryOperator { operand, op } => {
                let operand = self.eval(operand)?;
                Ok(value::apply_unary(self.host, &operand, *op)?)
            }
            NodeKind::And(lhs, rhs) => {
                let truth = self.eval(lhs)?.is_true() && self.eval(rhs)?.is_true();
                Ok(Value::Float(if truth { 1.0 } else { 0.0 }))
            }
            NodeKind::Or(lhs, rhs) => {
                let truth = self.eval(lhs)?.is_true() || self.eval(rhs)?.is_true();
                Ok(Value::Float(if truth { 1.0 } else { 0.0 }))
            }
            NodeKind::Not(operand) => {
                let truth = !self.eval(operand)?.is_true();
                Ok(Value::Float(if truth { 1.0 } else { 0.0 }))
            }
            NodeKind::Relation { lhs, rhs, op } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                Ok(value::apply_relation(&lhs, &rhs, *op))
            }

            NodeKind::If { cond, then } => {
                if self.eval(cond)?.is_true() {
                    self.eval(then)?;
                }
                Ok(Value::Void)
            }
            NodeKind::IfElse { cond, then, otherwise } => {
                if self.eval(cond)?.is_true() {
                    self.eval(then)?;
                } else {
                    self.eval(otherwise)?;
                }
                Ok(Value::Void)
            }
            NodeKind::While { cond, body } => {
                while self.eval(cond)?.is_true() {
                    self.eval(body)?;
                }
                Ok(Value::Void)
            }
            NodeKind::For { init, cond, step, body } => {
                self.eval(init)?;
                while self.eval(cond)?.is_true() {
                    self.eval(body)?;
                    self.eval(step)?;
                }
                Ok(Value::Void)
            }
            NodeKind::Block(child) => {
                self.symbols.push_scope();
                let result = self.eval(child);
                self.symbols.pop_scope();
                result?;
                Ok(Value::Void)
            }
            NodeKind::Seq(first, second) => {
                self.eval(first)?;
                self.eval(second)
            }
            NodeKind::FuncBodySeq { body, ret } => {
                self.eval(body)?;
                self.eval(ret)
            }

            NodeKind::Decl { name, ty } => {
                self.declare(name, *ty)?;
                Ok(Value::Void)
            }
            NodeKind::StructDecl { type_name, name, init } => {
                self.declare_struct_variable(type_name, name, init.as_deref())?;
                Ok(Value::Void)
            }
            NodeKind::FuncDecl(name) => {
                self.declare_function(name, None)?;
                Ok(Value::Void)
            }
            NodeKind::MethodDecl { struct_name, name } => {
                self.declare_function(name, Some(struct_name))?;
                Ok(Value::Void)
            }
            NodeKind::FuncDef { decl, params, body, is_method } => {
                let sym = match &decl.kind {
                    NodeKind::FuncDecl(name) => self.declare_function(name, None)?,
                    NodeKind::MethodDecl { struct_name, name } => {
                        self.declare_function(name, Some(struct_name))?
                    }
                    _ => return Err(self.fatal("malformed function definition")),
                };
                let name = Rc::from(sym.borrow().name());
                let func = FunctionValue {
                    name,
                    params: params.clone(),
                    body: body.clone(),
                    is_method: *is_method,
                };
                sym.borrow_mut().assign(Value::Function(Rc::new(func)));
                Ok(Value::Void)
            }

            NodeKind::Ret(expr) => {
                let value = self.eval(expr)?;
                Err(Interrupt::Return(value))
            }

            NodeKind::Call { target, args } => {
                let callee = self.eval(target)?;
                self.push_frame()?;
                let arg_values = self.eval_value_list(args);
                self.pop_frame();
                let arg_values = arg_values?;
                match callee {
                    Value::Function(func) => self.call_user_function(&func, arg_values),
                    Value::String(name) => self.call_named_function(&name, &arg_values),
                    _ => Err(self.fatal("variable is not a function or instrument")),
                }
            }

            NodeKind::StructDef { name, members } => {
                if self.symbols.current_scope() != 0 {
                    return Err(self.fatal("struct definitions are only allowed at global scope"));
                }
                self.symbols
                    .install_struct_type(name, members.clone())
                    .map_err(Interrupt::Fatal)?;
                Ok(Value::Void)
            }
        }
    }

    /// Evaluate the nodes of a list literal or argument list.
    fn eval_value_list(&mut self, elems: &[Node]) -> Eval<Vec<Value>> {
        if elems.len() > MAX_LIST_ITEMS {
            return Err(self.fatal("exceeded maximum number of items for a list"));
        }
        let mut values = Vec::with_capacity(elems.len());
        for elem in elems {
            values.push(self.eval(elem)?);
        }
        Ok(values)
    }

    /// Evaluate a node as an assignment target, yielding its symbol.
    fn eval_lvalue(&mut self, node: &Node) -> Eval<SymbolRef> {
        if node.line > 0 {
            self.line = node.line;
        }
        match &node.kind {
            NodeKind::LoadSym(name) => self
                .symbols
                .lookup(name, LookupMode::AnyLevel)
                .ok_or_else(|| self.fatal(format!("'{name}' is not declared"))),
            NodeKind::AutoDeclLoadSym(name) => {
                let in_call = self.symbols.in_function_call();
                Ok(self.symbols.lookup_or_autodeclare(name, in_call))
            }
            NodeKind::Decl { name, ty } => self.declare(name, *ty),
            NodeKind::MemberAccess { target, member } => {
                let object = self.eval(target)?;
                let Value::Struct(instance) = &object else {
                    return Err(self.fatal(format!("variable is not a struct (no member '{member}')")));
                };
                instance.lookup_member(member).ok_or_else(|| {
                    self.fatal(format!(
                        "struct {} has no member '{member}'",
                        instance.type_name()
                    ))
                })
            }
            _ => Err(self.fatal("expression is not assignable")),
        }
    }

    fn store_value(&mut self, sym: &SymbolRef, value: Value, allow_type_overwrite: bool) -> Eval<()> {
        let existing = sym.borrow().data_type();
        let incoming = value.data_type();
        if existing != ValueType::Void && incoming != ValueType::Void && existing != incoming {
            let name = sym.borrow().name().to_string();
            if allow_type_overwrite {
                warn!(
                    "overwriting {} variable '{}' with {}",
                    existing.name(),
                    name,
                    incoming.name()
                );
            } else {
                return Err(self.fatal(format!(
                    "cannot overwrite {} member '{}' with {}",
                    existing.name(),
                    name,
                    incoming.name()
                )));
            }
        }
        sym.borrow_mut().assign(value);
        Ok(())
    }

    fn op_assign(&mut self, sym: &SymbolRef, rhs: &Value, op: AssignOp) -> Eval<Value> {
        let lhs = sym.borrow().value().clone();
        let (Some(current), Some(delta)) = (lhs.as_float(), rhs.as_float()) else {
            warn!("can only use '{}' with numbers", op.symbol());
            return Ok(lhs);
        };
        let updated = match op {
            AssignOp::Plus | AssignOp::Increment => current + delta,
            AssignOp::Minus | AssignOp::Decrement => current - delta,
            AssignOp::Mul => current * delta,
            AssignOp::Div => current / delta,
        };
        sym.borrow_mut().assign(Value::Float(updated));
        Ok(Value::Float(updated))
    }

    fn subscript_read(&mut self, target: &Value, index: &Value) -> Eval<Value> {
        match target {
            Value::List(list) => {
                let Some(flt_index) = index.as_float() else {
                    return Err(self.fatal("list index must be a number"));
                };
                let list = list.borrow();
                if list.is_empty() {
                    return Err(self.fatal("attempt to index an empty list"));
                }
                let len = list.len();
                let mut idx = flt_index as i64;
                let mut frac = flt_index - idx as f64;
                if flt_index < 0.0 {
                    if flt_index <= -2.0 {
                        warn!("negative index: returning last element");
                    }
                    idx = len as i64 - 1;
                    frac = 0.0;
                } else if flt_index > (len - 1) as f64 {
                    warn!("attempt to index past the end of a list: returning last element");
                    idx = len as i64 - 1;
                    frac = 0.0;
                }
                let idx = idx as usize;
                let elem = &list[idx];
                // Linear interpolation for adjacent float elements.
                if frac > 0.0 && idx < len - 1 {
                    if let (Value::Float(a), Value::Float(b)) = (elem, &list[idx + 1]) {
                        return Ok(Value::Float(a + frac * (b - a)));
                    }
                    if let Value::Float(a) = elem {
                        return Ok(Value::Float(*a));
                    }
                }
                Ok(elem.clone())
            }
            Value::Map(map) => {
                let map = map.borrow();
                match map.get(&MapKey(index.clone())) {
                    Some(v) => Ok(v.clone()),
                    None => Err(self.fatal("no item in map with that key")),
                }
            }
            Value::String(s) => {
                let Some(flt_index) = index.as_float() else {
                    return Err(self.fatal("string index must be a number"));
                };
                if s.is_empty() {
                    return Err(self.fatal("attempt to index an empty string"));
                }
                let len = s.len();
                let mut idx = flt_index as i64;
                if idx < 0 {
                    if idx <= -2 {
                        warn!("negative index: returning last character");
                    }
                    idx = len as i64 - 1;
                } else if idx > len as i64 - 1 {
                    warn!("attempt to index past the end of a string: returning last character");
                    idx = len as i64 - 1;
                }
                let idx = idx as usize;
                match s.get(idx..).and_then(|tail| tail.chars().next()) {
                    Some(c) => Ok(Value::string(&c.to_string())),
                    None => {
                        warn!("string index is not on a character boundary");
                        Ok(Value::string(""))
                    }
                }
            }
            _ => Err(self.fatal(
                "attempt to index or search an RHS-variable that's not a string, list, or map",
            )),
        }
    }

    fn subscript_write(&mut self, sym: &SymbolRef, index: &Value, value: Value) -> Eval<()> {
        let target = sym.borrow().value().clone();
        match target {
            Value::List(list) => {
                let Some(flt_index) = index.as_float() else {
                    return Err(self.fatal("list index must be a number"));
                };
                let mut idx = flt_index as i64;
                if flt_index - idx as f64 > 0.0 {
                    warn!("list index must be integer ... correcting");
                }
                let mut list = list.borrow_mut();
                let len = list.len();
                if idx < 0 {
                    if idx <= -2 {
                        warn!("negative index ... assigning to last element");
                    }
                    idx = if len > 0 { len as i64 - 1 } else { 0 };
                }
                let idx = idx as usize;
                if idx >= len {
                    // Grow the list; pad with the written value's typed zero.
                    let pad = match value.data_type() {
                        ValueType::Float => Value::Float(0.0),
                        _ => Value::Void,
                    };
                    list.resize(idx + 1, pad);
                }
                list[idx] = value;
                Ok(())
            }
            Value::Map(map) => {
                map.borrow_mut().insert(MapKey(index.clone()), value);
                Ok(())
            }
            _ => Err(self.fatal(
                "attempt to index or store into an L-variable that's not a list or map",
            )),
        }
    }

    fn member_access(&mut self, object: &Value, member: &str) -> Eval<Value> {
        let Value::Struct(instance) = object else {
            return Err(self.fatal(format!("variable is not a struct (no member '{member}')")));
        };
        if let Some(member_sym) = instance.lookup_member(member) {
            let value = member_sym.borrow().value().clone();
            return Ok(value);
        }
        // Not a member; try a method bound under the mangled name.
        let mangled = mangled_method_name(instance.type_name(), member);
        match self.symbols.lookup(&mangled, LookupMode::AnyLevel) {
            Some(method_sym) => {
                let value = method_sym.borrow().value().clone();
                // Deposit the receiver for the upcoming Call.
                self.this_stack.push(object.clone());
                Ok(value)
            }
            None => Err(self.fatal(format!(
                "variable of type 'struct {}' has no member or method '{member}'",
                instance.type_name()
            ))),
        }
    }

    fn declare(&mut self, name: &str, ty: ValueType) -> Eval<SymbolRef> {
        let mode = if self.in_function_arg_list {
            LookupMode::ThisLevel
        } else {
            LookupMode::AnyLevel
        };
        if let Some(sym) = self.symbols.lookup(name, mode) {
            if sym.borrow().scope() == self.symbols.current_scope() {
                if self.in_function_arg_list {
                    return Err(self.fatal(format!(
                        "{}(): argument variable '{name}' already used",
                        self.current_function()
                    )));
                }
                warn!("variable '{name}' redefined - using existing one");
                return Ok(sym);
            }
            if !self.symbols.in_function_call() && !self.in_function_arg_list {
                warn!("variable '{name}' also defined at enclosing scope");
            }
        }
        let sym = self.symbols.install(name, false);
        sym.borrow_mut().declare_as(ty);
        Ok(sym)
    }

    fn declare_struct_variable(
        &mut self,
        type_name: &str,
        name: &str,
        init: Option<&Node>,
    ) -> Eval<SymbolRef> {
        let Some(struct_type) = self.symbols.lookup_struct_type(type_name) else {
            return Err(self.fatal(format!("struct type '{type_name}' is not defined")));
        };
        let init_values = match init {
            Some(node) => match self.eval(node)? {
                Value::List(items) => Some(items.borrow().clone()),
                _ => return Err(self.fatal("struct initializer must be a list")),
            },
            None => None,
        };
        if let Some(sym) = self.symbols.lookup(name, LookupMode::AnyLevel) {
            if sym.borrow().scope() == self.symbols.current_scope() {
                if self.in_function_arg_list {
                    return Err(self.fatal(format!(
                        "{}(): argument variable '{name}' already used",
                        self.current_function()
                    )));
                }
                if init.is_some() {
                    return Err(self.fatal(format!(
                        "cannot redefine struct variable '{name}' with initializers"
                    )));
                }
                warn!("variable '{name}' redefined - using existing one");
                return Ok(sym);
            }
            if !self.symbols.in_function_call() && !self.in_function_arg_list {
                warn!("variable '{name}' also defined at enclosing scope");
            }
        }
        let instance = self
            .symbols
            .instantiate_struct(&struct_type, init_values.as_deref())
            .map_err(Interrupt::Fatal)?;
        let sym = self.symbols.install(name, false);
        sym.borrow_mut().assign(Value::Struct(instance));
        Ok(sym)
    }

    fn declare_function(&mut self, name: &str, struct_name: Option<&str>) -> Eval<SymbolRef> {
        if self.symbols.current_scope() > 0 {
            return Err(self.fatal("functions may only be declared at global scope"));
        }
        let key = match struct_name {
            Some(s) => mangled_method_name(s, name),
            None => name.to_string(),
        };
        if self.symbols.lookup(&key, LookupMode::GlobalLevel).is_some() {
            return Err(match struct_name {
                Some(s) => self.fatal(format!("method {name}() is already declared for struct {s}")),
                None => self.fatal(format!("function {name}() is already declared")),
            });
        }
        let sym = self.symbols.install(&key, true);
        sym.borrow_mut().declare_as(ValueType::Function);
        Ok(sym)
    }

    fn call_named_function(&mut self, name: &str, args: &[Value]) -> Eval<Value> {
        if let Some(result) = builtins::call_builtin(self, name, args) {
            return result;
        }
        match self.host.call_function(name, args) {
            Ok(HostCall::Handled(value)) => Ok(value),
            Ok(HostCall::NotFound) => {
                Err(Interrupt::Fatal(Error::FunctionNotFound(name.to_string())))
            }
            Err(e) => Err(Interrupt::Fatal(e)),
        }
    }

    fn call_user_function(&mut self, func: &Rc<FunctionValue>, args: Vec<Value>) -> Eval<Value> {
        self.called_functions.push(func.name.clone());
        if self.print_level >= PrintLevel::Prints {
            let _ = writeln!(self.out, "============================");
            let _ = write!(self.out, "{}: ", name_from_mangled(&func.name));
            builtins::write_value_list(&mut self.out, &args, self.print_list_limit);
            let _ = writeln!(self.out);
        }

        self.symbols.push_function_stack();
        self.symbols.push_scope();

        let setup = self.bind_call_arguments(func, args);
        let result = match setup {
            Ok(()) => {
                self.call_depth += 1;
                let saved_line = self.line;
                let saved_file = self.file.clone();
                let outcome = self.eval(&func.body);
                self.call_depth -= 1;
                self.line = saved_line;
                self.file = saved_file;
                outcome
            }
            Err(e) => Err(e),
        };

        self.symbols.pop_function_stack();
        self.called_functions.pop();

        match result {
            Ok(value) => Ok(value),
            Err(Interrupt::Return(value)) => Ok(value),
            Err(fatal) => Err(fatal),
        }
    }

    /// The callee prologue: declare each argument symbol in the callee
    /// scope and copy the caller's values in.
    fn bind_call_arguments(&mut self, func: &Rc<FunctionValue>, args: Vec<Value>) -> Eval<()> {
        if func.is_method {
            let receiver = self
                .this_stack
                .pop()
                .ok_or_else(|| self.fatal(format!("{}(): method called without a receiver", func.name)))?;
            let this_sym = self.symbols.install("this", false);
            this_sym.borrow_mut().assign(receiver);
        }

        if args.len() > func.params.len() {
            return Err(self.fatal(format!(
                "{}() takes {} arguments but was passed {}!",
                name_from_mangled(&func.name),
                func.params.len(),
                args.len()
            )));
        }

        self.in_function_arg_list = true;
        let outcome = (|| {
            for (i, param) in func.params.iter().enumerate() {
                if func.params[..i].iter().any(|p| p.name == param.name) {
                    return Err(self.fatal(format!(
                        "{}(): argument variable '{}' already used",
                        name_from_mangled(&func.name),
                        param.name
                    )));
                }
                let sym = if param.ty == ValueType::Struct {
                    let type_name = param.struct_type.as_deref().unwrap_or("");
                    let Some(struct_type) = self.symbols.lookup_struct_type(type_name) else {
                        return Err(self.fatal(format!("struct type '{type_name}' is not defined")));
                    };
                    let instance = self
                        .symbols
                        .instantiate_struct(&struct_type, None)
                        .map_err(Interrupt::Fatal)?;
                    let sym = self.symbols.install(&param.name, false);
                    sym.borrow_mut().assign(Value::Struct(instance));
                    sym
                } else {
                    let sym = self.symbols.install(&param.name, false);
                    sym.borrow_mut().declare_as(param.ty);
                    sym
                };
                match args.get(i) {
                    Some(value) => {
                        if param.ty != ValueType::Void && value.data_type() != param.ty {
                            return Err(self.fatal(format!(
                                "{}() arg {} ('{}') passed as {}, expecting {}",
                                name_from_mangled(&func.name),
                                i,
                                param.name,
                                value.type_name(),
                                param.ty.name()
                            )));
                        }
                        sym.borrow_mut().assign(value.clone());
                    }
                    None => {
                        if self.warn_defaulted_args {
                            warn!(
                                "{}(): arg {} ('{}') not provided - defaulting to 0",
                                name_from_mangled(&func.name),
                                i,
                                param.name
                            );
                        }
                        let default = Value::default_of(param.ty);
                        sym.borrow_mut().assign(default);
                    }
                }
            }
            Ok(())
        })();
        self.in_function_arg_list = false;
        outcome
    }
}
