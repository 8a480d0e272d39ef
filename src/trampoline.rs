use crate::evaluator::EvalResult;
use crate::types::Value;

pub type Thunk = Box<dyn FnOnce() -> EvalResult<Trampoline>>;

/// Either a computed value or a deferred continuation. Every tail
/// position in the evaluator returns `More` so the host stack unwinds
/// before the next step runs; `run` is the only driver.
pub enum Trampoline {
    Done(Value),
    More(Thunk),
}

impl Trampoline {
    pub fn defer(thunk: impl FnOnce() -> EvalResult<Trampoline> + 'static) -> Trampoline {
        Trampoline::More(Box::new(thunk))
    }

    /// Unwraps deferred steps until a concrete value is produced.
    pub fn run(self) -> EvalResult<Value> {
        let mut current = self;
        loop {
            match current {
                Trampoline::Done(value) => return Ok(value),
                Trampoline::More(thunk) => current = thunk()?,
            }
        }
    }
}
