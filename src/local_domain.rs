//! Per-stage argument selection.
//!
//! A [`LocalDomainView`] picks, from the whole aggregate, exactly the fields
//! a stage declares, in declaration order, so that accessor `n` of the stage
//! resolves to argument `n` without any lookup by placeholder at run time.

use crate::aggregate::Aggregate;
use crate::error::BuildError;
use crate::stage::{Extent, Intent, Placeholder, Stage};

/// One resolved stage argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgBinding {
    /// The declared placeholder.
    pub placeholder: Placeholder,
    /// Slot of the bound field in the aggregate.
    pub slot: usize,
    /// Declared intent.
    pub intent: Intent,
    /// Declared read extent.
    pub extent: Extent,
    /// Whether no stage of the plan writes this field.
    pub readonly: bool,
    /// Whether the field is a block-local temporary.
    pub temporary: bool,
    /// Cache of the stage's group serving this argument.
    pub cache: Option<usize>,
    /// Field name, for diagnostics.
    pub name: String,
}

/// The ordered arguments of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDomainView {
    stage: String,
    entries: Vec<ArgBinding>,
}

impl LocalDomainView {
    /// Resolves every argument of `stage` against `aggregate`.
    ///
    /// `written[slot]` tells whether any stage of the plan writes that slot.
    ///
    /// # Errors
    /// [`BuildError::UnboundPlaceholder`] for an argument without a field.
    pub fn build(stage: &Stage, aggregate: &Aggregate, written: &[bool]) -> Result<Self, BuildError> {
        let entries = stage
            .args()
            .iter()
            .map(|arg| {
                let slot = aggregate.slot_of(arg.placeholder).ok_or_else(|| BuildError::UnboundPlaceholder {
                    stage: stage.name().to_owned(),
                    placeholder: arg.placeholder.index(),
                })?;
                let field = &aggregate.slots()[slot];
                Ok(ArgBinding {
                    placeholder: arg.placeholder,
                    slot,
                    intent: arg.intent,
                    extent: arg.extent,
                    readonly: !written.get(slot).copied().unwrap_or(false),
                    temporary: field.is_temporary(),
                    cache: None,
                    name: field.name().to_owned(),
                })
            })
            .collect::<Result<Vec<_>, BuildError>>()?;
        Ok(Self { stage: stage.name().to_owned(), entries })
    }

    /// Name of the stage this view belongs to.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage
    }

    /// Arguments in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[ArgBinding] {
        &self.entries
    }

    /// Argument `n`.
    #[must_use]
    pub fn entry(&self, n: usize) -> Option<&ArgBinding> {
        self.entries.get(n)
    }

    /// Routes every argument on `slot` through cache `cache`.
    pub(crate) fn attach_cache(&mut self, slot: usize, cache: usize) {
        for e in self.entries.iter_mut().filter(|e| e.slot == slot) {
            e.cache = Some(cache);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Field;

    #[test]
    fn entries_follow_declaration_order() {
        let (a, b, c) = (Placeholder::new(0), Placeholder::new(1), Placeholder::new(2));
        let agg = Aggregate::new()
            .with(a, Field::new(1, 1, 1, 0.0, "a"))
            .with(b, Field::new(1, 1, 1, 0.0, "b"))
            .temporary(c, "c");
        let stage = Stage::new("s")
            .input(c, Extent::horizontal(-1, 1, 0, 0))
            .inout(a, Extent::zero())
            .input(b, Extent::zero());
        let written = [true, false, true];
        let mut view = LocalDomainView::build(&stage, &agg, &written).unwrap();

        let names: Vec<&str> = view.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["c", "a", "b"]);
        assert!(view.entry(0).is_some_and(|e| e.temporary && !e.readonly));
        assert!(view.entry(2).is_some_and(|e| e.readonly));
        assert!(view.entry(3).is_none());

        view.attach_cache(1, 0);
        assert_eq!(view.entry(2).and_then(|e| e.cache), Some(0));
        assert_eq!(view.entry(1).and_then(|e| e.cache), None);
    }

    #[test]
    fn unbound_argument_is_rejected() {
        let agg = Aggregate::new().with(Placeholder::new(0), Field::new(1, 1, 1, 0.0, "a"));
        let stage = Stage::new("lap").input(Placeholder::new(4), Extent::zero());
        assert_eq!(
            LocalDomainView::build(&stage, &agg, &[false]),
            Err(BuildError::UnboundPlaceholder { stage: "lap".into(), placeholder: 4 })
        );
    }
}
