//! Decision plans: the sorted, grouped form code generation works from.
//!
//! A plan is an ascending list of distinct values with the text (or hit marker) to
//! produce for each, partitioned into maximal runs of consecutive values. The plan's
//! [`Shape`] decides which instruction pattern the generator emits.

use crate::codegen::{
    descriptor::EnumDescriptor,
    value::{EnumValue, IntegerKind},
};

/// One value the generated code recognizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    /// The recognized value
    pub value: EnumValue,
    /// Text produced for the value
    pub name: String,
}

/// A maximal run of consecutive values, as a range of plan entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    /// Index of the first entry
    pub start: usize,
    /// Number of entries
    pub len: usize,
}

/// Code shape selected for a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// No recognized values
    Empty,
    /// One equality test
    Single,
    /// Two equality tests
    Pair,
    /// One `switch` over a single run
    Contiguous,
    /// One `switch` over the full span, with gap slots
    DenseTable,
    /// Balanced binary search over runs
    BinarySearch,
}

/// The sorted, grouped constant set of one generated operation.
#[derive(Debug, Clone)]
pub struct DecisionPlan {
    /// Underlying integer representation
    pub kind: IntegerKind,
    /// Recognized values, ascending
    pub entries: Vec<PlanEntry>,
    /// Maximal runs of consecutive values
    pub runs: Vec<Run>,
    /// Entries include synthesized flag combinations
    pub is_flags: bool,
    /// Every value of the type's width is either recognized or zero
    pub exhaustive: bool,
}

impl DecisionPlan {
    /// Plan for name lookup (ToString).
    ///
    /// Flag enums are extended with every union of their single-bit constants that is
    /// not already a declared value, as long as there are at most
    /// `max_flag_combinations` such unions.
    #[must_use]
    pub fn for_names(descriptor: &EnumDescriptor, max_flag_combinations: usize) -> Self {
        let mut entries: Vec<PlanEntry> = descriptor
            .constants
            .iter()
            .map(|constant| PlanEntry {
                value: constant.value,
                name: constant.name.clone(),
            })
            .collect();

        let mut exhaustive = false;
        if descriptor.is_flags {
            let mut singles: Vec<EnumValue> = descriptor
                .constants
                .iter()
                .map(|constant| constant.value)
                .filter(EnumValue::is_single_bit)
                .collect();
            singles.sort_by_key(EnumValue::bits);

            let within_budget = singles.len() < usize::BITS as usize
                && (1usize << singles.len()) <= max_flag_combinations;
            if within_budget {
                for subset in 1usize..(1usize << singles.len()) {
                    if subset.count_ones() < 2 {
                        continue;
                    }
                    let value = singles
                        .iter()
                        .enumerate()
                        .filter(|(bit, _)| subset & (1 << bit) != 0)
                        .fold(EnumValue::from_bits(descriptor.kind, 0), |acc, (_, v)| {
                            acc.union(v)
                        });
                    if entries.iter().all(|entry| entry.value != value) {
                        entries.push(PlanEntry {
                            value,
                            name: descriptor.format(value),
                        });
                    }
                }

                let covered = singles.iter().fold(0u64, |acc, value| acc | value.bits());
                exhaustive = covered == descriptor.kind.mask();
            }
        }

        Self::new(descriptor.kind, entries, descriptor.is_flags, exhaustive)
    }

    /// Plan for membership tests (IsDefined): declared values only, never expanded.
    #[must_use]
    pub fn for_values(descriptor: &EnumDescriptor) -> Self {
        let entries = descriptor
            .constants
            .iter()
            .map(|constant| PlanEntry {
                value: constant.value,
                name: constant.name.clone(),
            })
            .collect();
        Self::new(descriptor.kind, entries, false, false)
    }

    fn new(kind: IntegerKind, mut entries: Vec<PlanEntry>, is_flags: bool, exhaustive: bool) -> Self {
        entries.sort_by(|a, b| a.value.cmp(&b.value));
        entries.dedup_by(|later, earlier| later.value == earlier.value);

        let mut runs: Vec<Run> = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            match runs.last_mut() {
                Some(run)
                    if entries[run.start + run.len - 1].value.checked_next()
                        == Some(entry.value) =>
                {
                    run.len += 1;
                }
                _ => runs.push(Run {
                    start: index,
                    len: 1,
                }),
            }
        }

        DecisionPlan {
            kind,
            entries,
            runs,
            is_flags,
            exhaustive,
        }
    }

    /// Number of recognized values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no value is recognized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distance between the smallest and largest recognized value.
    #[must_use]
    pub fn span(&self) -> u64 {
        match (self.entries.first(), self.entries.last()) {
            (Some(first), Some(last)) => last.value.offset_from(&first.value),
            _ => 0,
        }
    }

    /// The entry for `value`.
    #[must_use]
    pub fn lookup(&self, value: EnumValue) -> Option<&PlanEntry> {
        self.entries
            .binary_search_by(|entry| entry.value.cmp(&value))
            .ok()
            .map(|index| &self.entries[index])
    }

    /// Selects the code shape. A table covering gaps is used when
    /// `span <= density_ratio * count`.
    #[must_use]
    pub fn shape(&self, density_ratio: u64) -> Shape {
        match self.entries.len() {
            0 => Shape::Empty,
            1 => Shape::Single,
            2 => Shape::Pair,
            count => {
                if self.runs.len() == 1 {
                    Shape::Contiguous
                } else if u128::from(self.span())
                    <= u128::from(density_ratio) * count as u128
                {
                    Shape::DenseTable
                } else {
                    Shape::BinarySearch
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codegen::descriptor::EnumConstant,
        metadata::signatures::TypeName,
    };

    fn descriptor(kind: IntegerKind, values: &[(&str, i64)], is_flags: bool) -> EnumDescriptor {
        let declared: Vec<EnumConstant> = values
            .iter()
            .map(|(name, value)| EnumConstant {
                name: (*name).to_string(),
                value: EnumValue::from_i64(kind, *value),
            })
            .collect();
        EnumDescriptor {
            name: TypeName::new("Test", "E"),
            kind,
            constants: declared.clone(),
            declared,
            is_flags,
        }
    }

    #[test]
    fn test_shapes() {
        let shape = |values: &[(&str, i64)]| {
            DecisionPlan::for_names(&descriptor(IntegerKind::I4, values, false), 256).shape(2)
        };
        assert_eq!(shape(&[]), Shape::Empty);
        assert_eq!(shape(&[("Zero", 0)]), Shape::Single);
        assert_eq!(shape(&[("A", 0), ("B", 9)]), Shape::Pair);
        assert_eq!(shape(&[("A", -1), ("B", 0), ("C", 1)]), Shape::Contiguous);
        assert_eq!(shape(&[("A", 0), ("B", 2), ("C", 5)]), Shape::DenseTable);
        assert_eq!(shape(&[("A", 0), ("B", 100), ("C", 5000)]), Shape::BinarySearch);
    }

    #[test]
    fn test_runs_respect_signedness() {
        let plan = DecisionPlan::for_values(&descriptor(
            IntegerKind::I1,
            &[("Min", -128), ("Max", 127), ("M1", -1), ("Z", 0)],
            false,
        ));
        let values: Vec<i128> = plan.entries.iter().map(|e| e.value.as_i128()).collect();
        assert_eq!(values, vec![-128, -1, 0, 127]);
        assert_eq!(
            plan.runs,
            vec![
                Run { start: 0, len: 1 },
                Run { start: 1, len: 2 },
                Run { start: 3, len: 1 }
            ]
        );
        assert_eq!(plan.span(), 255);
    }

    #[test]
    fn test_flag_expansion() {
        let desc = descriptor(IntegerKind::I4, &[("A", 1), ("B", 2), ("C", 4)], true);
        let plan = DecisionPlan::for_names(&desc, 256);
        let names: Vec<&str> = plan.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["A", "B", "A, B", "C", "A, C", "B, C", "A, B, C"]
        );
        assert!(!plan.exhaustive);
        assert!(DecisionPlan::for_values(&desc).len() == 3);

        let capped = DecisionPlan::for_names(&desc, 4);
        assert_eq!(capped.len(), 3);
    }

    #[test]
    fn test_flag_expansion_exhaustive_byte() {
        let values: Vec<(String, i64)> = (0..8).map(|bit| (format!("F{bit}"), 1i64 << bit)).collect();
        let refs: Vec<(&str, i64)> = values.iter().map(|(n, v)| (n.as_str(), *v)).collect();
        let plan = DecisionPlan::for_names(&descriptor(IntegerKind::U1, &refs, true), 256);
        assert!(plan.exhaustive);
        assert_eq!(plan.len(), 255);
        assert_eq!(plan.runs.len(), 1);
        assert_eq!(
            plan.lookup(EnumValue::from_i64(IntegerKind::U1, 0x81)).map(|e| e.name.as_str()),
            Some("F0, F7")
        );
    }
}
