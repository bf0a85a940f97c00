#![forbid(unsafe_code)]
//! Selects how a record page's history is combined into a readable page or
//! a fresh modifiable container (spec §3.2, §4.5).

use sirix_page::{RecordPage, RecordPageContainer};
use sirix_types::{PageReference, Result, RevisionNumber, SirixError};

/// One of the four mandatory reconstruction strategies. Each record page's
/// family/index pair is versioned independently under the same policy,
/// configured resource-wide (spec §6 `versioning`).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum VersioningPolicy {
    /// Every revision stores the complete page; `previous` is always `None`.
    Full,
    /// Stores a delta against the last full dump; a fresh full dump is
    /// written every `revisions_to_restore` commits.
    Differential,
    /// Stores a delta against the immediately prior version; reconstruction
    /// walks the `previous` chain back to the nearest milestone.
    Incremental,
    /// Like `Incremental`, but a page's delta chain is capped at `window`
    /// versions; once the chain would exceed it, the next version starts a
    /// fresh full dump instead of extending the chain.
    Sliding { window: u32 },
}

impl VersioningPolicy {
    /// `true` when `revision` falls on a milestone boundary and must be
    /// written as a full dump regardless of policy (spec §4.5: "on
    /// full-dump revisions, dirty-flag skipping is disabled").
    pub fn is_full_dump_revision(&self, revision: RevisionNumber, revisions_to_restore: u32) -> bool {
        match self {
            VersioningPolicy::Full => true,
            _ => revisions_to_restore == 0 || revision.0 % revisions_to_restore as u64 == 0,
        }
    }

    /// Folds a chain of versions, oldest first, into the page state as of
    /// the newest entry. `versions` must be exactly the history the active
    /// policy needs (a full dump followed by its deltas) — typically the
    /// result of `get_snapshot_pages`.
    pub fn combine_for_read(&self, versions: &[RecordPage]) -> Result<RecordPage> {
        let (first, rest) = versions
            .split_first()
            .ok_or(SirixError::Corruption("empty page version chain"))?;
        let mut combined = first.clone();
        for version in rest {
            for (&offset, slot) in &version.entries {
                combined.entries.insert(offset, slot.clone());
            }
            combined.revision = version.revision;
        }
        combined.previous = None;
        Ok(combined)
    }

    /// Produces the `{complete, modified}` container a write transaction
    /// edits: `complete` is the reconstructed pre-image (via
    /// `combine_for_read`), `modified` is a fresh empty delta page for
    /// `next_revision`, whose `previous` pointer is set per policy.
    ///
    /// `reference` is the immediately prior version's location, reused as
    /// `modified.previous` by `Incremental`/`Sliding`. `milestone_reference`
    /// is the last full dump's location, reused by `Differential` instead —
    /// the two policies chain to different points, so they need distinct
    /// references rather than sharing one.
    pub fn combine_for_modification(
        &self,
        versions: &[RecordPage],
        revisions_to_restore: u32,
        next_revision: RevisionNumber,
        reference: Option<PageReference>,
        milestone_reference: Option<PageReference>,
    ) -> Result<RecordPageContainer> {
        let complete = self.combine_for_read(versions)?;
        let full_dump = self.is_full_dump_revision(next_revision, revisions_to_restore);
        let previous = match self {
            VersioningPolicy::Full => None,
            VersioningPolicy::Differential => {
                if full_dump {
                    None
                } else {
                    milestone_reference
                }
            }
            VersioningPolicy::Incremental => {
                if full_dump {
                    None
                } else {
                    reference
                }
            }
            VersioningPolicy::Sliding { window } => {
                if full_dump || chain_length(versions) >= *window {
                    None
                } else {
                    reference
                }
            }
        };
        let mut modified = RecordPage::empty(
            complete.family,
            complete.index,
            complete.page_key,
            next_revision,
        );
        modified.previous = previous;
        Ok(RecordPageContainer::new(complete, modified))
    }
}

/// Number of delta pages in the chain, excluding the anchoring full dump.
fn chain_length(versions: &[RecordPage]) -> u32 {
    versions.len().saturating_sub(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use sirix_types::{PageFamily, PageKey};

    fn page_at(revision: u64) -> RecordPage {
        RecordPage::empty(PageFamily::Record, 0, PageKey(0), RevisionNumber(revision))
    }

    #[test]
    fn full_policy_never_delta_references_previous() {
        let versions = vec![page_at(1)];
        let container = VersioningPolicy::Full
            .combine_for_modification(&versions, 10, RevisionNumber(2), Some(PageReference::NULL), None)
            .unwrap();
        assert!(container.modified.previous.is_none());
    }

    #[test]
    fn differential_resets_previous_on_milestone() {
        let versions = vec![page_at(1)];
        let reference = Some(PageReference {
            key: Some(1),
            log_key: None,
        });
        let on_boundary = VersioningPolicy::Differential
            .combine_for_modification(&versions, 4, RevisionNumber(4), reference, reference)
            .unwrap();
        assert!(on_boundary.modified.previous.is_none());

        let off_boundary = VersioningPolicy::Differential
            .combine_for_modification(&versions, 4, RevisionNumber(5), reference, reference)
            .unwrap();
        assert_eq!(off_boundary.modified.previous, reference);
    }

    #[test]
    fn differential_chains_to_the_milestone_not_the_prior_delta() {
        // Two revisions past the milestone: `reference` is the immediately
        // prior delta's location, `milestone_reference` is the original full
        // dump's — Differential must chain to the latter, not the former,
        // so reconstruction only ever needs the milestone plus one delta.
        let versions = vec![page_at(1), page_at(2)];
        let reference = Some(PageReference {
            key: Some(2),
            log_key: None,
        });
        let milestone_reference = Some(PageReference {
            key: Some(1),
            log_key: None,
        });
        let container = VersioningPolicy::Differential
            .combine_for_modification(&versions, 4, RevisionNumber(3), reference, milestone_reference)
            .unwrap();
        assert_eq!(container.modified.previous, milestone_reference);
        assert_ne!(container.modified.previous, reference);
    }

    #[test]
    fn incremental_chains_to_the_prior_delta_not_the_milestone() {
        let versions = vec![page_at(1), page_at(2)];
        let reference = Some(PageReference {
            key: Some(2),
            log_key: None,
        });
        let milestone_reference = Some(PageReference {
            key: Some(1),
            log_key: None,
        });
        let container = VersioningPolicy::Incremental
            .combine_for_modification(&versions, 4, RevisionNumber(3), reference, milestone_reference)
            .unwrap();
        assert_eq!(container.modified.previous, reference);
        assert_ne!(container.modified.previous, milestone_reference);
    }

    #[test]
    fn sliding_window_caps_chain_length() {
        let versions = vec![page_at(1), page_at(2), page_at(3)];
        let reference = Some(PageReference {
            key: Some(7),
            log_key: None,
        });
        let container = VersioningPolicy::Sliding { window: 2 }
            .combine_for_modification(&versions, 0, RevisionNumber(4), reference, None)
            .unwrap();
        assert!(container.modified.previous.is_none());
    }

    #[test]
    fn combine_for_read_folds_deltas_in_order() {
        let mut v1 = page_at(1);
        v1.put(0, b"a".to_vec());
        let mut v2 = page_at(2);
        v2.put(0, b"b".to_vec());
        v2.put(1, b"c".to_vec());
        let combined = VersioningPolicy::Incremental
            .combine_for_read(&[v1, v2])
            .unwrap();
        assert_eq!(combined.get(0), Some(&b"b"[..]));
        assert_eq!(combined.get(1), Some(&b"c"[..]));
        assert_eq!(combined.revision, RevisionNumber(2));
    }
}
