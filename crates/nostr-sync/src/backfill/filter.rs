// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Backfill filter

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use nostr::filter::{Alphabet, SingleLetterTag};
use nostr::{EventId, Filter, Kind, PublicKey, Timestamp};

/// Invalid [`BackfillFilter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// No kinds
    NoKinds,
    /// `since` is after `until`
    InvalidRange {
        /// Since
        since: Timestamp,
        /// Until
        until: Timestamp,
    },
}

impl std::error::Error for FilterError {}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoKinds => write!(f, "backfill filter requires at least one kind"),
            Self::InvalidRange { since, until } => {
                write!(f, "invalid range: since {since} is after until {until}")
            }
        }
    }
}

/// Query paged backward by the backfill engine
///
/// Same shape as a relay [`Filter`], minus `limit`: the page size comes from
/// [`BackfillOptions::batch_size`](super::BackfillOptions::batch_size).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillFilter {
    /// Kinds (at least one)
    pub kinds: BTreeSet<Kind>,
    /// Authors, split in chunks. Empty means any author.
    pub authors: Vec<PublicKey>,
    /// Oldest timestamp to reach
    pub since: Option<Timestamp>,
    /// Newest timestamp to start from (default: now)
    pub until: Option<Timestamp>,
    /// Single-letter tag filters (i.e. `#p`, `#e`, `#d`)
    pub tags: BTreeMap<SingleLetterTag, BTreeSet<String>>,
}

impl BackfillFilter {
    /// Empty filter
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add kind
    #[inline]
    pub fn kind(mut self, kind: Kind) -> Self {
        self.kinds.insert(kind);
        self
    }

    /// Add kinds
    #[inline]
    pub fn kinds<I>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = Kind>,
    {
        self.kinds.extend(kinds);
        self
    }

    /// Add author
    pub fn author(mut self, author: PublicKey) -> Self {
        if !self.authors.contains(&author) {
            self.authors.push(author);
        }
        self
    }

    /// Add authors, keeping order and skipping duplicates
    pub fn authors<I>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = PublicKey>,
    {
        for author in authors.into_iter() {
            self = self.author(author);
        }
        self
    }

    /// Set since
    #[inline]
    pub fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    /// Set until
    #[inline]
    pub fn until(mut self, until: Timestamp) -> Self {
        self.until = Some(until);
        self
    }

    /// Add tag values
    pub fn custom_tags<I, S>(mut self, tag: SingleLetterTag, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .entry(tag)
            .or_default()
            .extend(values.into_iter().map(|v| v.into()));
        self
    }

    /// Add `#p` tag
    #[inline]
    pub fn pubkey(self, pubkey: PublicKey) -> Self {
        self.custom_tags(SingleLetterTag::lowercase(Alphabet::P), [pubkey.to_hex()])
    }

    /// Add `#e` tag
    #[inline]
    pub fn event(self, id: EventId) -> Self {
        self.custom_tags(SingleLetterTag::lowercase(Alphabet::E), [id.to_hex()])
    }

    /// Add `#d` tag
    #[inline]
    pub fn identifier<S>(self, identifier: S) -> Self
    where
        S: Into<String>,
    {
        self.custom_tags(SingleLetterTag::lowercase(Alphabet::D), [identifier])
    }

    /// Reject malformed filters before any relay traffic
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.kinds.is_empty() {
            return Err(FilterError::NoKinds);
        }

        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since > until {
                return Err(FilterError::InvalidRange { since, until });
            }
        }

        Ok(())
    }

    /// Relay filter for one page
    pub(crate) fn to_filter(
        &self,
        authors: Option<&[PublicKey]>,
        until: Timestamp,
        limit: usize,
    ) -> Filter {
        let mut filter: Filter = Filter::new()
            .kinds(self.kinds.iter().copied())
            .until(until)
            .limit(limit);

        if let Some(authors) = authors {
            filter = filter.authors(authors.iter().copied());
        }

        if let Some(since) = self.since {
            filter = filter.since(since);
        }

        for (tag, values) in self.tags.iter() {
            filter = filter.custom_tags(*tag, values.iter().cloned());
        }

        filter
    }
}

#[cfg(test)]
mod tests {
    use nostr::Keys;

    use super::*;

    #[test]
    fn test_validate() {
        assert_eq!(BackfillFilter::new().validate(), Err(FilterError::NoKinds));

        let filter = BackfillFilter::new()
            .kind(Kind::TextNote)
            .since(Timestamp::from(200))
            .until(Timestamp::from(100));
        assert_eq!(
            filter.validate(),
            Err(FilterError::InvalidRange {
                since: Timestamp::from(200),
                until: Timestamp::from(100),
            })
        );

        let filter = BackfillFilter::new()
            .kind(Kind::TextNote)
            .since(Timestamp::from(100))
            .until(Timestamp::from(100));
        assert!(filter.validate().is_ok());
    }

    #[test]
    fn test_authors_are_deduplicated_in_order() {
        let a = Keys::generate().public_key();
        let b = Keys::generate().public_key();
        let filter = BackfillFilter::new().authors([a, b, a]).author(b);
        assert_eq!(filter.authors, vec![a, b]);
    }

    #[test]
    fn test_to_filter() {
        let keys = Keys::generate();
        let filter = BackfillFilter::new()
            .kind(Kind::from(24243))
            .pubkey(keys.public_key())
            .since(Timestamp::from(10));

        let page = filter.to_filter(None, Timestamp::from(500), 100);

        let expected = Filter::new()
            .kind(Kind::from(24243))
            .pubkey(keys.public_key())
            .since(Timestamp::from(10))
            .until(Timestamp::from(500))
            .limit(100);
        assert_eq!(page, expected);
    }
}
