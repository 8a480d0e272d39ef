use crate::evaluator::RuntimeError;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::Write;

/// The capability object `print`, `read` and `load` dispatch through.
/// Resolved from the environment chain by nearest-ancestor lookup.
pub trait IoAdapter {
    fn read_line(&self) -> Result<String, RuntimeError>;
    fn print(&self, text: &str) -> Result<(), RuntimeError>;
    fn println(&self, text: &str) -> Result<(), RuntimeError> {
        self.print(text)?;
        self.print("\n")
    }
    fn read_file(&self, path: &str) -> Result<String, RuntimeError>;
}

/// Process stdio.
pub struct StdIo;

impl IoAdapter for StdIo {
    fn read_line(&self) -> Result<String, RuntimeError> {
        let mut line = String::new();
        let read = std::io::stdin()
            .read_line(&mut line)
            .map_err(|e| RuntimeError::Io(e.to_string()))?;
        if read == 0 {
            return Err(RuntimeError::Io("end of input".to_string()));
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    fn print(&self, text: &str) -> Result<(), RuntimeError> {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(text.as_bytes())
            .and_then(|_| stdout.flush())
            .map_err(|e| RuntimeError::Io(e.to_string()))
    }

    fn read_file(&self, path: &str) -> Result<String, RuntimeError> {
        fs::read_to_string(path).map_err(|e| RuntimeError::Io(format!("{}: {}", path, e)))
    }
}

/// String-backed adapter for tests and embedding: reads come from a line
/// queue, writes accumulate in a buffer, files from a preloaded map.
#[derive(Default)]
pub struct StringIo {
    input: RefCell<VecDeque<String>>,
    output: RefCell<String>,
    files: RefCell<HashMap<String, String>>,
}

impl StringIo {
    pub fn new() -> Self {
        StringIo::default()
    }

    pub fn with_input<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let io = StringIo::new();
        io.input
            .borrow_mut()
            .extend(lines.into_iter().map(Into::into));
        io
    }

    pub fn push_line(&self, line: impl Into<String>) {
        self.input.borrow_mut().push_back(line.into());
    }

    pub fn add_file(&self, path: impl Into<String>, contents: impl Into<String>) {
        self.files.borrow_mut().insert(path.into(), contents.into());
    }

    pub fn output(&self) -> String {
        self.output.borrow().clone()
    }
}

impl IoAdapter for StringIo {
    fn read_line(&self) -> Result<String, RuntimeError> {
        self.input
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| RuntimeError::Io("end of input".to_string()))
    }

    fn print(&self, text: &str) -> Result<(), RuntimeError> {
        self.output.borrow_mut().push_str(text);
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<String, RuntimeError> {
        self.files
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| RuntimeError::Io(format!("{}: no such file", path)))
    }
}
