//! Dynamically typed values moved between tasks
//!
//! A task resumes with a `Value` and ends with one. The scheduler never
//! looks inside; only the task that receives it extracts a concrete type.
//!
//! Two normalizations keep the API pleasant:
//!
//! - `()` becomes the empty value, so `Ok(())` bodies end "with no value"
//! - wrapping a `Value` in a `Value` is a no-op
//!
//! ```ignore
//! let v = Value::new(42u32);
//! assert_eq!(v.into_typed::<u32>().unwrap(), 42);
//!
//! assert!(Value::new(()).is_none());
//! ```

use core::fmt;
use std::any::{Any, TypeId};

use crate::error::{TaskError, TaskResult};

/// Type-erased payload, or nothing
pub struct Value {
    inner: Option<Box<dyn Any>>,
    type_name: &'static str,
}

const NONE_NAME: &str = "()";

impl Value {
    /// The empty value
    #[inline]
    pub const fn none() -> Self {
        Value { inner: None, type_name: NONE_NAME }
    }

    /// Wrap any owned value
    pub fn new<T: 'static>(value: T) -> Self {
        if TypeId::of::<T>() == TypeId::of::<()>() {
            return Value::none();
        }

        let type_name = std::any::type_name::<T>();
        let boxed: Box<dyn Any> = Box::new(value);
        match boxed.downcast::<Value>() {
            Ok(nested) => *nested,
            Err(boxed) => Value { inner: Some(boxed), type_name },
        }
    }

    /// Check if this is the empty value
    #[inline]
    pub fn is_none(&self) -> bool {
        self.inner.is_none()
    }

    /// Name of the wrapped type, `"()"` when empty
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Check if the wrapped value is a `T`
    pub fn is<T: 'static>(&self) -> bool {
        match &self.inner {
            Some(boxed) => boxed.is::<T>(),
            None => TypeId::of::<T>() == TypeId::of::<()>(),
        }
    }

    /// Borrow the wrapped value as a `T`
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.inner.as_ref().and_then(|boxed| boxed.downcast_ref::<T>())
    }

    /// Take the wrapped value as a `T`, handing `self` back on mismatch
    ///
    /// Asking for `Value` returns `self` unchanged; asking for `()` succeeds
    /// only on the empty value.
    pub fn downcast<T: 'static>(self) -> Result<T, Value> {
        if TypeId::of::<T>() == TypeId::of::<Value>() {
            let boxed: Box<dyn Any> = Box::new(self);
            return boxed.downcast::<T>().map(|v| *v).map_err(|_| Value::none());
        }

        let type_name = self.type_name;
        match self.inner {
            None => {
                let unit: Box<dyn Any> = Box::new(());
                unit.downcast::<T>().map(|v| *v).map_err(|_| Value::none())
            }
            Some(boxed) => boxed
                .downcast::<T>()
                .map(|v| *v)
                .map_err(|boxed| Value { inner: Some(boxed), type_name }),
        }
    }

    /// Like `downcast`, but a mismatch becomes `TaskError::TypeMismatch`
    pub fn into_typed<T: 'static>(self) -> TaskResult<T> {
        self.downcast::<T>().map_err(|found| TaskError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            found: found.type_name,
        })
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::none()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "Value(None)")
        } else {
            write!(f, "Value(<{}>)", self.type_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_unit_is_none() {
        assert!(Value::new(()).is_none());
        assert!(Value::none().is_none());
        assert!(Value::default().is_none());
        assert_eq!(Value::none().type_name(), "()");
    }

    #[test]
    fn test_value_nested_is_flattened() {
        let v = Value::new(Value::new(5i32));
        assert!(v.is::<i32>());
        assert_eq!(v.into_typed::<i32>().unwrap(), 5);
    }

    #[test]
    fn test_value_downcast_mismatch_returns_self() {
        let v = Value::new(String::from("hello"));
        let back = v.downcast::<u8>().unwrap_err();
        assert_eq!(back.downcast_ref::<String>().map(String::as_str), Some("hello"));
    }

    #[test]
    fn test_value_into_typed_error_names_types() {
        let err = Value::new(1u16).into_typed::<String>().unwrap_err();
        match err {
            TaskError::TypeMismatch { expected, found } => {
                assert!(expected.contains("String"));
                assert_eq!(found, "u16");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_value_as_value_and_unit() {
        let v = Value::new(vec![1u8, 2, 3]);
        let same: Value = v.downcast::<Value>().unwrap();
        assert_eq!(same.into_typed::<Vec<u8>>().unwrap(), vec![1, 2, 3]);

        assert!(Value::none().into_typed::<()>().is_ok());
        assert!(Value::new(1u8).into_typed::<()>().is_err());
        assert!(Value::none().into_typed::<u8>().is_err());
    }

    #[test]
    fn test_value_debug() {
        assert_eq!(format!("{:?}", Value::none()), "Value(None)");
        assert_eq!(format!("{:?}", Value::new(3u64)), "Value(<u64>)");
    }
}
