// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Contact list

use std::collections::BTreeSet;

use nostr::PublicKey;
use serde::{Deserialize, Serialize};

use crate::replaceable::SyncRecord;

/// Contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friend {
    /// Public key
    pub pubkey: PublicKey,
    /// Display name (never empty)
    pub name: String,
    /// Groups
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    /// Free note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Friend {
    /// New contact
    pub fn new<S>(pubkey: PublicKey, name: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            pubkey,
            name: name.into(),
            groups: Vec::new(),
            note: None,
        }
    }

    /// Add to a group
    pub fn group<S>(mut self, group: S) -> Self
    where
        S: Into<String>,
    {
        let group: String = group.into();
        if !self.groups.contains(&group) {
            self.groups.push(group);
        }
        self
    }

    /// Set note
    pub fn note<S>(mut self, note: S) -> Self
    where
        S: Into<String>,
    {
        self.note = Some(note.into());
        self
    }
}

/// Partial contact update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FriendPatch {
    /// New name
    pub name: Option<String>,
    /// New groups
    pub groups: Option<Vec<String>>,
    /// New note. `Some(None)` clears it.
    pub note: Option<Option<String>>,
}

/// Contact list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactList {
    /// Contacts, in insertion order
    pub friends: Vec<Friend>,
}

impl ContactList {
    /// Add a contact
    ///
    /// Returns `false` if the name is blank or the public key is already listed.
    pub fn add(&mut self, friend: Friend) -> bool {
        if friend.name.trim().is_empty() || self.get(&friend.pubkey).is_some() {
            return false;
        }

        self.friends.push(friend);
        true
    }

    /// Remove a contact. Returns `false` if not listed.
    pub fn remove(&mut self, pubkey: &PublicKey) -> bool {
        let len: usize = self.friends.len();
        self.friends.retain(|f| &f.pubkey != pubkey);
        self.friends.len() != len
    }

    /// Update a contact
    ///
    /// Returns `false` if not listed or if the patch would blank the name.
    pub fn update(&mut self, pubkey: &PublicKey, patch: FriendPatch) -> bool {
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return false;
            }
        }

        let Some(friend) = self.friends.iter_mut().find(|f| &f.pubkey == pubkey) else {
            return false;
        };

        if let Some(name) = patch.name {
            friend.name = name;
        }

        if let Some(groups) = patch.groups {
            friend.groups = groups;
        }

        if let Some(note) = patch.note {
            friend.note = note;
        }

        true
    }

    /// Get a contact
    #[inline]
    pub fn get(&self, pubkey: &PublicKey) -> Option<&Friend> {
        self.friends.iter().find(|f| &f.pubkey == pubkey)
    }

    /// Contacts sorted by name, case insensitive
    pub fn sorted(&self) -> Vec<&Friend> {
        let mut friends: Vec<&Friend> = self.friends.iter().collect();
        friends.sort_by_key(|f| f.name.to_lowercase());
        friends
    }

    /// All group names
    pub fn groups(&self) -> BTreeSet<&str> {
        self.friends
            .iter()
            .flat_map(|f| f.groups.iter().map(String::as_str))
            .collect()
    }

    /// Contacts of a group
    pub fn in_group<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a Friend> + 'a {
        self.friends
            .iter()
            .filter(move |f| f.groups.iter().any(|g| g == group))
    }
}

impl SyncRecord for ContactList {
    const IDENTIFIER: &'static str = "close-friends";
    const STORAGE_PREFIX: &'static str = "nostr_friends";

    #[inline]
    fn is_empty(&self) -> bool {
        self.friends.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use nostr::Keys;

    use super::*;

    #[test]
    fn test_add_rejects_duplicates_and_blank_names() {
        let mut list = ContactList::default();
        let pk = Keys::generate().public_key();

        assert!(list.add(Friend::new(pk, "alice")));
        assert!(!list.add(Friend::new(pk, "other")));
        assert!(!list.add(Friend::new(Keys::generate().public_key(), "  ")));
        assert_eq!(list.friends.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut list = ContactList::default();
        let pk = Keys::generate().public_key();
        list.add(Friend::new(pk, "alice"));

        assert!(list.remove(&pk));
        assert!(!list.remove(&pk));
        assert!(SyncRecord::is_empty(&list));
    }

    #[test]
    fn test_update() {
        let mut list = ContactList::default();
        let pk = Keys::generate().public_key();
        list.add(Friend::new(pk, "alice").note("met at the conf"));

        let patch = FriendPatch {
            name: Some(String::from("Alice")),
            groups: Some(vec![String::from("work")]),
            note: Some(None),
        };
        assert!(list.update(&pk, patch));

        let friend = list.get(&pk).unwrap();
        assert_eq!(friend.name, "Alice");
        assert_eq!(friend.groups, vec![String::from("work")]);
        assert_eq!(friend.note, None);

        let blank = FriendPatch {
            name: Some(String::new()),
            ..Default::default()
        };
        assert!(!list.update(&pk, blank));
        assert!(!list.update(&Keys::generate().public_key(), FriendPatch::default()));
    }

    #[test]
    fn test_sorted_and_groups() {
        let mut list = ContactList::default();
        list.add(Friend::new(Keys::generate().public_key(), "carol").group("family"));
        list.add(Friend::new(Keys::generate().public_key(), "Bob").group("work"));
        list.add(
            Friend::new(Keys::generate().public_key(), "alice")
                .group("work")
                .group("family"),
        );

        let names: Vec<&str> = list.sorted().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "Bob", "carol"]);

        assert_eq!(
            list.groups().into_iter().collect::<Vec<_>>(),
            vec!["family", "work"]
        );
        assert_eq!(list.in_group("work").count(), 2);
        assert_eq!(list.in_group("gym").count(), 0);
    }

    #[test]
    fn test_serialized_as_plain_array() {
        let mut list = ContactList::default();
        let pk = Keys::generate().public_key();
        list.add(Friend::new(pk, "alice"));

        let json = serde_json::to_string(&list).unwrap();
        assert_eq!(
            json,
            format!(r#"[{{"pubkey":"{}","name":"alice"}}]"#, pk.to_hex())
        );
        assert_eq!(serde_json::from_str::<ContactList>(&json).unwrap(), list);
    }
}
