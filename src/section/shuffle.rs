//! Shuffle mappings: old position to new position, or removed.

use std::fmt;

use crate::error::{FlowError, Result};

/// A permutation with insertions and deletions of an ordered collection.
///
/// Entry `i` holds the new position of the member previously at `i`, or
/// `None` if it was removed. Every new position not targeted by an entry is
/// a freshly inserted member.
///
/// # Example
///
/// ```
/// use render_flow::ShuffleMapping;
///
/// // [a, b, c] -> [c, a, b]
/// let mapping = ShuffleMapping::new(vec![Some(1), Some(2), Some(0)], 3).unwrap();
/// assert_eq!(mapping.inverse(), vec![Some(2), Some(0), Some(1)]);
///
/// // [a, b, c, d] -> splice(1, 2, [x]) -> [a, x, d]
/// let spliced = ShuffleMapping::splice(4, 1, 2, 1);
/// assert_eq!(spliced.entries(), &[Some(0), None, None, Some(2)]);
/// assert_eq!(spliced.new_len(), 3);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct ShuffleMapping {
    entries: Vec<Option<usize>>,
    new_len: usize,
}

impl ShuffleMapping {
    /// Create a mapping, checking that it is a valid partition of old positions.
    pub fn new(entries: Vec<Option<usize>>, new_len: usize) -> Result<Self> {
        let mut taken = vec![false; new_len];
        for (old, entry) in entries.iter().enumerate() {
            let Some(new) = *entry else { continue };
            let Some(slot) = taken.get_mut(new) else {
                return Err(FlowError::MalformedShuffle {
                    reason: format!(
                        "position {} maps to {} but the new length is {}",
                        old, new, new_len
                    ),
                });
            };
            if *slot {
                return Err(FlowError::MalformedShuffle {
                    reason: format!("new position {} is targeted twice", new),
                });
            }
            *slot = true;
        }
        Ok(Self { entries, new_len })
    }

    /// Create a mapping from signed entries, where any negative entry means removed.
    pub fn from_signed(entries: &[isize], new_len: usize) -> Result<Self> {
        Self::new(
            entries
                .iter()
                .map(|&e| usize::try_from(e).ok())
                .collect(),
            new_len,
        )
    }

    /// The mapping of `splice(start, delete_count, ..inserted)` on a list of `old_len`.
    ///
    /// `start` and `delete_count` are clamped to the list like a splice would.
    pub fn splice(old_len: usize, start: usize, delete_count: usize, inserted: usize) -> Self {
        let start = start.min(old_len);
        let delete_count = delete_count.min(old_len - start);
        let entries = (0..old_len)
            .map(|old| {
                if old < start {
                    Some(old)
                } else if old < start + delete_count {
                    None
                } else {
                    Some(old - delete_count + inserted)
                }
            })
            .collect();
        Self {
            entries,
            new_len: old_len - delete_count + inserted,
        }
    }

    /// The mapping that keeps every member in place.
    pub fn identity(len: usize) -> Self {
        Self {
            entries: (0..len).map(Some).collect(),
            new_len: len,
        }
    }

    /// Entries indexed by old position.
    pub fn entries(&self) -> &[Option<usize>] {
        &self.entries
    }

    /// New position of the member previously at `old`.
    pub fn get(&self, old: usize) -> Option<usize> {
        self.entries.get(old).copied().flatten()
    }

    /// Length before the shuffle.
    pub fn old_len(&self) -> usize {
        self.entries.len()
    }

    /// Length after the shuffle.
    pub fn new_len(&self) -> usize {
        self.new_len
    }

    /// Returns true if no member moves, disappears or appears.
    pub fn is_identity(&self) -> bool {
        self.new_len == self.entries.len()
            && self.entries.iter().enumerate().all(|(i, e)| *e == Some(i))
    }

    /// Chain `next` after `self`, yielding a single old-to-newest mapping.
    pub fn compose(&self, next: &ShuffleMapping) -> Result<Self> {
        if next.old_len() != self.new_len {
            return Err(FlowError::MalformedShuffle {
                reason: format!(
                    "cannot chain a mapping over {} positions after one producing {}",
                    next.old_len(),
                    self.new_len
                ),
            });
        }
        Ok(Self {
            entries: self
                .entries
                .iter()
                .map(|entry| entry.and_then(|mid| next.get(mid)))
                .collect(),
            new_len: next.new_len,
        })
    }

    /// Old position for every new position, `None` for inserted members.
    pub fn inverse(&self) -> Vec<Option<usize>> {
        let mut inverse = vec![None; self.new_len];
        for (old, entry) in self.entries.iter().enumerate() {
            if let Some(slot) = entry.and_then(|new| inverse.get_mut(new)) {
                *slot = Some(old);
            }
        }
        inverse
    }
}

impl fmt::Debug for ShuffleMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShuffleMapping(")?;
        f.debug_list()
            .entries(self.entries.iter().map(|e| match e {
                Some(new) => *new as isize,
                None => -1,
            }))
            .finish()?;
        write!(f, " -> {})", self.new_len)
    }
}
