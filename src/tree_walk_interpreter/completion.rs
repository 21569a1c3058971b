use super::{RuntimeError, Value};

/// Why evaluation stopped before reaching the end of a statement list.
#[derive(Debug)]
pub enum Abrupt {
    Return(Value),
    Error(RuntimeError),
}
impl From<RuntimeError> for Abrupt {
    fn from(error: RuntimeError) -> Self {
        Abrupt::Error(error)
    }
}

pub type Completion<T = Value> = Result<T, Abrupt>;

/// Collapses a completion at a function-call boundary: a return becomes the
/// call's value.
pub fn catch_return(completion: Completion) -> Result<Value, RuntimeError> {
    match completion {
        Ok(value) | Err(Abrupt::Return(value)) => Ok(value),
        Err(Abrupt::Error(error)) => Err(error),
    }
}

pub fn try_for_each_and_return_last<In, F: FnMut(&In) -> Completion>(
    items: &[In],
    default: Value,
    mut run: F,
) -> Completion {
    let mut last = default;
    for item in items {
        last = run(item)?;
    }
    Ok(last)
}
