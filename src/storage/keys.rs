use std::fmt;

/// Every key the persistence layer owns in the underlying store.
///
/// Each logical collection lives under exactly one of these keys. The literal
/// names are kept stable so existing stores and backups stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    /// Cached article records (the front-page dataset plus live upvote counts)
    Articles,
    /// Identifiers of articles the user has upvoted
    Upvotes,
    /// The user's saved reading list
    Library,
    /// Lowercase newsletter subscriber emails
    Newsletter,
    /// Flag set once the user has subscribed
    NewsletterSubscribed,
    /// Contact form submissions
    ContactMessages,
}

impl StorageKey {
    pub const ALL: [StorageKey; 6] = [
        StorageKey::Articles,
        StorageKey::Upvotes,
        StorageKey::Library,
        StorageKey::Newsletter,
        StorageKey::NewsletterSubscribed,
        StorageKey::ContactMessages,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StorageKey::Articles => "thedesigntimes_v1",
            StorageKey::Upvotes => "userUpvotes",
            StorageKey::Library => "libraryItems",
            StorageKey::Newsletter => "newsletter_subscribers",
            StorageKey::NewsletterSubscribed => "newsletter_subscribed",
            StorageKey::ContactMessages => "contactMessages",
        }
    }

    /// Resolve a literal key name back to its catalogue entry.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
