//! Symbols, lexical scopes, and struct types.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::warn;

use super::ast::MemberDecl;
use super::value::{Value, ValueType};
use crate::error::{Error, Result};

/// A name bound to a value within a scope.
#[derive(Debug)]
pub struct Symbol {
    name: Rc<str>,
    value: Value,
    declared: ValueType,
    scope: usize,
}

impl Symbol {
    fn new(name: Rc<str>, scope: usize) -> Symbol {
        Symbol {
            name,
            value: Value::Void,
            declared: ValueType::Void,
            scope,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> usize {
        self.scope
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    /// The symbol's type: the declared type until a non-void value lands.
    pub fn data_type(&self) -> ValueType {
        self.declared
    }

    /// Declare the symbol's type, installing the typed default value.
    pub fn declare_as(&mut self, ty: ValueType) {
        self.declared = ty;
        self.value = Value::default_of(ty);
    }

    /// Assign a value, tracking the type tag.
    pub fn assign(&mut self, value: Value) {
        if value.data_type() != ValueType::Void {
            self.declared = value.data_type();
        }
        self.value = value;
    }
}

pub type SymbolRef = Rc<RefCell<Symbol>>;

/// Where a lookup searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMode {
    /// Current scope only.
    ThisLevel,
    /// Global scope only.
    GlobalLevel,
    /// Innermost outward.
    AnyLevel,
}

#[derive(Default)]
struct Scope {
    table: HashMap<Rc<str>, SymbolRef>,
}

/// A registered struct template: ordered, typed member declarations.
#[derive(Debug)]
pub struct StructType {
    name: Rc<str>,
    members: Vec<MemberDecl>,
}

impl StructType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[MemberDecl] {
        &self.members
    }
}

/// An instance of a struct type: its own member symbol chain.
#[derive(Debug)]
pub struct StructInstance {
    struct_type: Rc<StructType>,
    members: Vec<SymbolRef>,
}

impl StructInstance {
    pub fn type_name(&self) -> &str {
        self.struct_type.name()
    }

    pub fn struct_type(&self) -> &Rc<StructType> {
        &self.struct_type
    }

    pub fn members(&self) -> &[SymbolRef] {
        &self.members
    }

    pub fn lookup_member(&self, name: &str) -> Option<SymbolRef> {
        self.members
            .iter()
            .find(|m| m.borrow().name() == name)
            .cloned()
    }
}

/// Encode `(structName, functionName)` into the reserved global key under
/// which methods are stored.
pub fn mangled_method_name(struct_name: &str, function_name: &str) -> String {
    format!("#{function_name}$${struct_name}")
}

/// Recover the plain function name from a possibly mangled one, for
/// diagnostics.
pub fn name_from_mangled(name: &str) -> &str {
    match name.strip_prefix('#') {
        Some(rest) => rest.split("$$").next().unwrap_or(rest),
        None => name,
    }
}

/// The scope stack plus the struct-type registry.
pub struct SymbolTable {
    scopes: Vec<Scope>,
    struct_types: HashMap<Rc<str>, Rc<StructType>>,
    function_stack: Vec<usize>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable {
            scopes: vec![Scope::default()],
            struct_types: HashMap::new(),
            function_stack: Vec::new(),
        }
    }

    /// Index of the innermost scope. The global scope is 0.
    pub fn current_scope(&self) -> usize {
        self.scopes.len() - 1
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Pop scopes until `depth` is the innermost again.
    pub fn restore_scope(&mut self, depth: usize) {
        while self.current_scope() > depth {
            self.scopes.pop();
        }
    }

    /// Bracket a function call so a nonlocal return can unwind safely.
    pub fn push_function_stack(&mut self) {
        self.function_stack.push(self.current_scope());
    }

    /// Close the bracket opened by [`push_function_stack`](Self::push_function_stack),
    /// restoring the scope depth recorded there.
    pub fn pop_function_stack(&mut self) {
        if let Some(depth) = self.function_stack.pop() {
            self.restore_scope(depth);
        }
    }

    pub fn in_function_call(&self) -> bool {
        !self.function_stack.is_empty()
    }

    pub fn lookup(&self, name: &str, mode: LookupMode) -> Option<SymbolRef> {
        match mode {
            LookupMode::ThisLevel => self.scopes.last().and_then(|s| s.table.get(name)).cloned(),
            LookupMode::GlobalLevel => self.scopes[0].table.get(name).cloned(),
            LookupMode::AnyLevel => self
                .scopes
                .iter()
                .rev()
                .find_map(|s| s.table.get(name))
                .cloned(),
        }
    }

    /// Create a symbol at the current (or global) scope. Shadowing is
    /// permitted; an existing same-scope binding is replaced.
    pub fn install(&mut self, name: &str, global: bool) -> SymbolRef {
        let index = if global { 0 } else { self.current_scope() };
        let name: Rc<str> = Rc::from(name);
        let symbol = Rc::new(RefCell::new(Symbol::new(name.clone(), index)));
        self.scopes[index].table.insert(name, symbol.clone());
        symbol
    }

    /// Look up `name` anywhere; autodeclare it in the current scope when
    /// absent. `in_called_function` is advisory, for diagnostics only.
    pub fn lookup_or_autodeclare(&mut self, name: &str, in_called_function: bool) -> SymbolRef {
        if let Some(sym) = self.lookup(name, LookupMode::AnyLevel) {
            return sym;
        }
        if in_called_function {
            warn!("'{name}' implicitly declared inside a function call");
        }
        self.install(name, false)
    }

    /// Register a struct type; structs live in the global scope.
    pub fn install_struct_type(&mut self, name: &str, members: Vec<MemberDecl>) -> Result<Rc<StructType>> {
        if self.struct_types.contains_key(name) {
            return Err(Error::Script(format!("struct type '{name}' is already defined")));
        }
        let name: Rc<str> = Rc::from(name);
        let ty = Rc::new(StructType {
            name: name.clone(),
            members,
        });
        self.struct_types.insert(name, ty.clone());
        Ok(ty)
    }

    pub fn lookup_struct_type(&self, name: &str) -> Option<Rc<StructType>> {
        self.struct_types.get(name).cloned()
    }

    /// Build an instance of `ty`, optionally copying an initializer list
    /// element-wise into the members (type-checked).
    pub fn instantiate_struct(
        &self,
        ty: &Rc<StructType>,
        init: Option<&[Value]>,
    ) -> Result<Rc<StructInstance>> {
        if let Some(init) = init {
            if init.len() > ty.members().len() {
                return Err(Error::Script(format!(
                    "struct {} has {} members but {} initializers were given",
                    ty.name(),
                    ty.members().len(),
                    init.len()
                )));
            }
        }
        let mut members = Vec::with_capacity(ty.members().len());
        for (i, decl) in ty.members().iter().enumerate() {
            let mut sym = Symbol::new(decl.name.clone(), usize::MAX);
            match decl.ty {
                ValueType::Struct => {
                    sym.declared = ValueType::Struct;
                    if let Some(subtype) = decl
                        .subtype
                        .as_deref()
                        .and_then(|n| self.lookup_struct_type(n))
                    {
                        sym.value = Value::Struct(self.instantiate_struct(&subtype, None)?);
                    }
                }
                other => sym.declare_as(other),
            }
            if let Some(value) = init.and_then(|init| init.get(i)) {
                if value.data_type() != decl.ty {
                    return Err(Error::Script(format!(
                        "struct {} member '{}' initialized with a {} (expected {})",
                        ty.name(),
                        decl.name,
                        value.type_name(),
                        decl.ty.name()
                    )));
                }
                sym.assign(value.clone());
            }
            members.push(Rc::new(RefCell::new(sym)));
        }
        Ok(Rc::new(StructInstance {
            struct_type: ty.clone(),
            members,
        }))
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
