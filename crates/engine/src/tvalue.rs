//! Memoization cells for resource fields.

use std::fmt;
use std::sync::Arc;

/// Bitmask describing whether a field has reached its terminal state.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct State(u8);

impl State {
    pub const UNSET: State = State(0);
    pub const IS_SET: State = State(1);
    pub const IS_NULL: State = State(1 << 1);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: State) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: State) -> State {
        State(self.0 | other.0)
    }

    pub fn is_set(self) -> bool {
        self.contains(State::IS_SET)
    }

    pub fn is_null(self) -> bool {
        self.contains(State::IS_NULL)
    }
}

impl std::ops::BitOr for State {
    type Output = State;

    fn bitor(self, rhs: State) -> State {
        self.union(rhs)
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_set(), self.is_null()) {
            (false, _) => f.write_str("Unset"),
            (true, false) => f.write_str("IsSet"),
            (true, true) => f.write_str("IsSet|IsNull"),
        }
    }
}

/// Error recorded on a field; every reader of the field sees the same instance.
#[derive(Clone)]
pub struct FieldError(Arc<anyhow::Error>);

impl FieldError {
    pub fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }

    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::new(anyhow::Error::msg(message))
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    /// Whether two handles point at the very same recorded error.
    pub fn same_as(&self, other: &FieldError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<anyhow::Error> for FieldError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(error)
    }
}

impl fmt::Debug for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl std::error::Error for FieldError {}

impl PartialEq for FieldError {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

/// Value of one field together with its state and error.
#[derive(Debug, Clone, PartialEq)]
pub struct TValue<T> {
    pub data: T,
    pub state: State,
    pub error: Option<FieldError>,
}

impl<T> TValue<T> {
    /// A field holding a present value.
    pub fn set(data: T) -> Self {
        Self {
            data,
            state: State::IS_SET,
            error: None,
        }
    }

    /// A field that is intentionally absent.
    pub fn null(data: T) -> Self {
        Self {
            data,
            state: State::IS_SET | State::IS_NULL,
            error: None,
        }
    }

    /// A field whose computation failed.
    pub fn failed(data: T, error: FieldError) -> Self {
        Self {
            data,
            state: State::IS_SET | State::IS_NULL,
            error: Some(error),
        }
    }

    pub fn is_set(&self) -> bool {
        self.state.is_set()
    }

    pub fn is_null(&self) -> bool {
        self.state.is_null()
    }

    pub fn into_result(self) -> Result<T, FieldError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert_eq!(format!("{:?}", State::default()), "Unset");
        assert_eq!(TValue::set(1).state, State::IS_SET);
        assert!(TValue::null(0).is_null());

        let failed = TValue::failed(0, FieldError::msg("boom"));
        assert!(failed.is_set() && failed.is_null());
        assert_eq!(failed.into_result().map_err(|error| error.to_string()), Err("boom".to_string()));
    }

    #[test]
    fn cloned_errors_share_identity() {
        let error = FieldError::msg("denied");
        let copy = error.clone();
        assert!(error.same_as(&copy));
        assert!(!error.same_as(&FieldError::msg("denied")));
    }
}
