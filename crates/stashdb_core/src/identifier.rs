//! Object identity.
//!
//! An [`Identifier`] extracts the id of a stored object and, for objects
//! stored without one, derives and assigns a fresh id.

use crate::error::{StoreError, StoreResult};
use uuid::Uuid;

/// Resolves the id of a stored object.
pub trait Identifier<T>: Send + Sync {
    /// Returns the id carried by `object`, if any.
    fn get(&self, object: &T) -> Option<String>;

    /// Assigns `id` to an object that has none.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] if this identifier cannot write ids.
    fn set(&self, object: &mut T, id: &str) -> StoreResult<()>;

    /// Proposes an id for an object that has none. Defaults to a random UUID.
    fn suggest(&self, _object: &T) -> String {
        Uuid::new_v4().to_string()
    }

    /// Returns the object's id, deriving and assigning one if absent.
    ///
    /// `exists` reports ids already taken; a suggestion that collides gets a
    /// numeric suffix until it is free.
    fn get_or_init(&self, object: &mut T, exists: &dyn Fn(&str) -> bool) -> StoreResult<String> {
        if let Some(id) = self.get(object) {
            return Ok(id);
        }

        let base = self.suggest(object);
        let mut id = base.clone();
        let mut attempt = 0u32;
        while exists(&id) {
            attempt += 1;
            id = format!("{base}~{attempt}");
        }
        self.set(object, &id)?;
        Ok(id)
    }
}

type Getter<T> = Box<dyn Fn(&T) -> Option<String> + Send + Sync>;
type Setter<T> = Box<dyn Fn(&mut T, String) + Send + Sync>;
type Suggestion<T> = Box<dyn Fn(&T) -> String + Send + Sync>;

/// An [`Identifier`] built from closures.
///
/// ```rust
/// use stashdb_core::{FnIdentifier, Identifier};
///
/// #[derive(Clone)]
/// struct User { id: Option<String>, name: String }
///
/// let identifier = FnIdentifier::for_id(|u: &User| u.id.clone())
///     .with_setter(|u: &mut User, id| u.id = Some(id))
///     .with_suggestion(|u: &User| u.name.to_lowercase());
///
/// let mut user = User { id: None, name: "Ann".into() };
/// let id = identifier.get_or_init(&mut user, &|_| false).unwrap();
/// assert_eq!(id, "ann");
/// assert_eq!(user.id.as_deref(), Some("ann"));
/// ```
pub struct FnIdentifier<T> {
    getter: Getter<T>,
    setter: Option<Setter<T>>,
    suggestion: Option<Suggestion<T>>,
}

impl<T> FnIdentifier<T> {
    /// Creates an identifier from an id getter.
    pub fn for_id(getter: impl Fn(&T) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            getter: Box::new(getter),
            setter: None,
            suggestion: None,
        }
    }

    /// Sets the function used to assign derived ids.
    #[must_use]
    pub fn with_setter(mut self, setter: impl Fn(&mut T, String) + Send + Sync + 'static) -> Self {
        self.setter = Some(Box::new(setter));
        self
    }

    /// Sets the function used to propose ids.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        self.suggestion = Some(Box::new(suggestion));
        self
    }
}

impl<T> Identifier<T> for FnIdentifier<T> {
    fn get(&self, object: &T) -> Option<String> {
        (self.getter)(object).filter(|id| !id.is_empty())
    }

    fn set(&self, object: &mut T, id: &str) -> StoreResult<()> {
        match &self.setter {
            Some(setter) => {
                setter(object, id.to_owned());
                Ok(())
            }
            None => Err(StoreError::invalid_argument(
                "object has no id and the identifier has no setter",
            )),
        }
    }

    fn suggest(&self, object: &T) -> String {
        match &self.suggestion {
            Some(suggestion) => suggestion(object),
            None => Uuid::new_v4().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Item {
        id: Option<String>,
        name: String,
    }

    fn identifier() -> FnIdentifier<Item> {
        FnIdentifier::for_id(|i: &Item| i.id.clone())
            .with_setter(|i: &mut Item, id| i.id = Some(id))
            .with_suggestion(|i: &Item| i.name.clone())
    }

    #[test]
    fn existing_id_is_kept() {
        let mut item = Item {
            id: Some("x1".into()),
            name: "n".into(),
        };
        assert_eq!(identifier().get_or_init(&mut item, &|_| true).unwrap(), "x1");
    }

    #[test]
    fn suggestion_collisions_get_suffix() {
        let mut item = Item {
            id: None,
            name: "bob".into(),
        };
        let taken = ["bob", "bob~1"];
        let id = identifier()
            .get_or_init(&mut item, &|id| taken.contains(&id))
            .unwrap();
        assert_eq!(id, "bob~2");
        assert_eq!(item.id.as_deref(), Some("bob~2"));
    }

    #[test]
    fn empty_id_counts_as_absent() {
        let item = Item {
            id: Some(String::new()),
            name: "n".into(),
        };
        assert_eq!(identifier().get(&item), None);
    }

    #[test]
    fn missing_setter_is_an_error() {
        let identifier = FnIdentifier::for_id(|i: &Item| i.id.clone());
        let mut item = Item::default();
        assert!(matches!(
            identifier.get_or_init(&mut item, &|_| false),
            Err(StoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn default_suggestion_is_uuid() {
        let identifier = FnIdentifier::for_id(|i: &Item| i.id.clone())
            .with_setter(|i: &mut Item, id| i.id = Some(id));
        let mut item = Item::default();
        let id = identifier.get_or_init(&mut item, &|_| false).unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
