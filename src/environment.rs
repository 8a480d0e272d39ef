use crate::io::{IoAdapter, StdIo};
use crate::types::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum EnvError {
    UndefinedVariable(String),
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvError::UndefinedVariable(name) => {
                write!(f, "Undefined variable: {}", name)
            }
        }
    }
}

impl std::error::Error for EnvError {}

/// A lexically scoped frame of bindings. Frames are shared through
/// `Rc<RefCell<...>>` so closures keep their defining chain alive and
/// `set!` mutations stay observable through every holder.
pub struct Environment {
    outer: Option<Rc<RefCell<Environment>>>,
    bindings: HashMap<String, Value>,
    io: Option<Rc<dyn IoAdapter>>,
}

impl Environment {
    /// A bare top-level frame with no IO adapter (embedders supply their own).
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Environment {
            outer: None,
            bindings: HashMap::new(),
            io: None,
        }))
    }

    /// The default top-level frame, wired to process stdio.
    pub fn new_global() -> Rc<RefCell<Self>> {
        Environment::with_io(Rc::new(StdIo))
    }

    /// A top-level frame with the given IO adapter.
    pub fn with_io(io: Rc<dyn IoAdapter>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Environment {
            outer: None,
            bindings: HashMap::new(),
            io: Some(io),
        }))
    }

    /// Creates a new frame enclosed within an outer one.
    pub fn new_enclosed(outer: Rc<RefCell<Environment>>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Environment {
            outer: Some(outer),
            bindings: HashMap::new(),
            io: None,
        }))
    }

    /// Inserts or overwrites a binding in this frame.
    pub fn define(&mut self, name: String, value: Value) {
        self.bindings.insert(name, value);
    }

    /// Looks a name up, walking the outer chain.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.bindings.get(name) {
            Some(value.clone())
        } else {
            match &self.outer {
                Some(outer) => outer.borrow().get(name),
                None => None,
            }
        }
    }

    /// Mutates the first frame in the chain that binds `name`.
    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), EnvError> {
        if let Some(slot) = self.bindings.get_mut(name) {
            *slot = value;
            Ok(())
        } else {
            match &self.outer {
                Some(outer) => outer.borrow_mut().assign(name, value),
                None => Err(EnvError::UndefinedVariable(name.to_string())),
            }
        }
    }

    /// Finds the nearest frame carrying an IO adapter.
    pub fn lookup_io(&self) -> Option<Rc<dyn IoAdapter>> {
        if let Some(io) = &self.io {
            Some(io.clone())
        } else {
            match &self.outer {
                Some(outer) => outer.borrow().lookup_io(),
                None => None,
            }
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("bindings", &self.bindings)
            .field("has_outer", &self.outer.is_some())
            .field("has_io", &self.io.is_some())
            .finish()
    }
}
