//! Binding of placeholders to fields.

use crate::error::BuildError;
use crate::stage::Placeholder;
use crate::storage::Field;

/// The ordered collection of fields a computation runs on, addressed by
/// [`Placeholder`].
///
/// Several placeholders may alias the same field; the field is then stored
/// once and every access through either placeholder sees the same memory.
///
/// # Example
/// ```
/// use stencil_engine::aggregate::Aggregate;
/// use stencil_engine::stage::Placeholder;
/// use stencil_engine::storage::Field;
///
/// let (a, b, t) = (Placeholder::new(0), Placeholder::new(1), Placeholder::new(2));
/// let agg = Aggregate::new()
///     .with(a, Field::new(2, 2, 2, 0.0, "a"))
///     .alias(b, a)
///     .temporary(t, "tmp");
/// assert_eq!(agg.slot_of(a), agg.slot_of(b));
/// assert!(agg.field(t).is_some_and(Field::is_temporary));
/// assert!(agg.check_dense().is_ok());
/// ```
#[derive(Debug, Default)]
pub struct Aggregate {
    fields: Vec<Field>,
    bindings: Vec<Option<usize>>,
}

impl Aggregate {
    /// An empty aggregate.
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new(), bindings: Vec::new() }
    }

    /// Binds `field` to `p`, replacing any previous binding of `p`.
    /// Returns the field's slot.
    pub fn bind(&mut self, p: Placeholder, field: Field) -> usize {
        let slot = self.fields.len();
        self.fields.push(field);
        self.set_binding(p, Some(slot));
        slot
    }

    fn set_binding(&mut self, p: Placeholder, slot: Option<usize>) {
        let idx = p.index();
        if self.bindings.len() <= idx {
            self.bindings.resize(idx + 1, None);
        }
        self.bindings[idx] = slot;
    }

    /// Builder form of [`bind`](Self::bind).
    #[must_use]
    pub fn with(mut self, p: Placeholder, field: Field) -> Self {
        self.bind(p, field);
        self
    }

    /// Makes `p` refer to the field bound to `existing`. If `existing` is
    /// unbound, `p` stays unbound.
    #[must_use]
    pub fn alias(mut self, p: Placeholder, existing: Placeholder) -> Self {
        let slot = self.slot_of(existing);
        self.set_binding(p, slot);
        self
    }

    /// Binds a block-local temporary to `p`.
    #[must_use]
    pub fn temporary(self, p: Placeholder, name: impl Into<String>) -> Self {
        self.with(p, Field::temporary(name))
    }

    /// Slot of the field bound to `p`.
    #[must_use]
    pub fn slot_of(&self, p: Placeholder) -> Option<usize> {
        self.bindings.get(p.index()).copied().flatten()
    }

    /// Field bound to `p`.
    #[must_use]
    pub fn field(&self, p: Placeholder) -> Option<&Field> {
        self.slot_of(p).map(|s| &self.fields[s])
    }

    /// Mutable field bound to `p`.
    pub fn field_mut(&mut self, p: Placeholder) -> Option<&mut Field> {
        self.slot_of(p).map(|s| &mut self.fields[s])
    }

    /// Every stored field, by slot.
    #[must_use]
    pub fn slots(&self) -> &[Field] {
        &self.fields
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Field] {
        &mut self.fields
    }

    /// Number of placeholder indices in use (highest index plus one).
    #[must_use]
    pub fn placeholder_count(&self) -> usize {
        self.bindings.len()
    }

    /// Lowest placeholder bound to `slot`.
    #[must_use]
    pub fn placeholder_of(&self, slot: usize) -> Option<Placeholder> {
        self.bindings.iter().position(|b| *b == Some(slot)).map(Placeholder::new)
    }

    /// Checks that placeholder indices form `0..N`.
    ///
    /// # Errors
    /// [`BuildError::NonDensePlaceholders`] naming the first hole.
    pub fn check_dense(&self) -> Result<(), BuildError> {
        match self.bindings.iter().position(Option::is_none) {
            Some(missing) => Err(BuildError::NonDensePlaceholders { missing, max: self.bindings.len() - 1 }),
            None => Ok(()),
        }
    }

    /// Consumes the aggregate, returning the fields in slot order.
    #[must_use]
    pub fn into_fields(self) -> Vec<Field> {
        self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holes_are_reported() {
        let agg = Aggregate::new()
            .with(Placeholder::new(0), Field::new(1, 1, 1, 0.0, "a"))
            .with(Placeholder::new(3), Field::new(1, 1, 1, 0.0, "b"));
        assert_eq!(agg.check_dense(), Err(BuildError::NonDensePlaceholders { missing: 1, max: 3 }));
        assert_eq!(agg.placeholder_count(), 4);
    }

    #[test]
    fn rebinding_replaces() {
        let p = Placeholder::new(0);
        let mut agg = Aggregate::new().with(p, Field::new(1, 1, 1, 1.0, "old"));
        let slot = agg.bind(p, Field::new(1, 1, 1, 2.0, "new"));
        assert_eq!(agg.slot_of(p), Some(slot));
        assert_eq!(agg.field(p).map(Field::name), Some("new"));
        assert_eq!(agg.placeholder_of(0), None);
    }

    #[test]
    fn aliasing_an_unbound_placeholder_leaves_it_unbound() {
        let agg = Aggregate::new().alias(Placeholder::new(1), Placeholder::new(0));
        assert_eq!(agg.slot_of(Placeholder::new(1)), None);
        assert!(agg.check_dense().is_err());
    }
}
