//! Entity operations: reading list, upvotes, article cache, newsletter, contact log.
//!
//! Each collection lives under one [`StorageKey`] and is updated by reading the
//! whole collection, modifying it, and writing it back.
use chrono::Utc;
use serde::de::DeserializeOwned;

use super::backend::KeyValueStore;
use super::keys::StorageKey;
use super::service::Storage;
use super::types::{
    Article, ContactDraft, ContactMessage, StorageError, Subscription, Toggle,
};
use crate::util::normalize_email;

impl<S: KeyValueStore> Storage<S> {
    /// Write `value` under `key`, mapping a refused write to `WriteFailed`.
    fn persist<T: serde::Serialize + ?Sized>(
        &self,
        key: StorageKey,
        value: &T,
    ) -> Result<(), StorageError> {
        if self.set(key, value) {
            Ok(())
        } else {
            Err(StorageError::WriteFailed(key.as_str().to_string()))
        }
    }

    /// Read a collection that is about to be rewritten.
    ///
    /// Unlike [`Storage::get`], only a never-written key yields an empty
    /// collection. Corrupt or wrong-shape data is an error, so a mutation never
    /// replaces records it could not read.
    pub(super) fn load_for_update<T: DeserializeOwned>(
        &self,
        key: StorageKey,
    ) -> Result<Vec<T>, StorageError> {
        match self.try_get(key) {
            Ok(items) => Ok(items),
            Err(StorageError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Refusing to overwrite unreadable collection");
                Err(e)
            }
        }
    }

    // ========================================================================
    // Reading List
    // ========================================================================

    /// Saved articles, most recently saved first.
    pub fn library(&self) -> Vec<Article> {
        self.get(StorageKey::Library, Vec::new())
    }

    pub fn is_saved(&self, article_id: &str) -> bool {
        self.library().iter().any(|a| a.id == article_id)
    }

    /// Save `article` to the front of the reading list, or remove it if it is
    /// already saved.
    pub fn toggle_saved(&self, article: &Article) -> Result<Toggle, StorageError> {
        let mut library: Vec<Article> = self.load_for_update(StorageKey::Library)?;
        let toggle = if library.iter().any(|a| a.id == article.id) {
            library.retain(|a| a.id != article.id);
            Toggle::Removed
        } else {
            library.insert(0, article.clone());
            Toggle::Added
        };

        self.persist(StorageKey::Library, &library)?;
        tracing::debug!(article_id = %article.id, ?toggle, "Toggled saved article");
        Ok(toggle)
    }

    // ========================================================================
    // Upvotes
    // ========================================================================

    pub fn upvotes(&self) -> Vec<String> {
        self.get(StorageKey::Upvotes, Vec::new())
    }

    pub fn has_upvoted(&self, article_id: &str) -> bool {
        self.upvotes().iter().any(|id| id == article_id)
    }

    /// Add or withdraw the user's upvote for `article_id`.
    ///
    /// The cached article (if any) has its `upvotes` count adjusted by one in
    /// the same direction. An unreadable cache is left alone, and a failure to
    /// update the cache is logged but does not undo the upvote itself.
    pub fn toggle_upvote(&self, article_id: &str) -> Result<Toggle, StorageError> {
        let mut upvotes: Vec<String> = self.load_for_update(StorageKey::Upvotes)?;
        let toggle = if upvotes.iter().any(|id| id == article_id) {
            upvotes.retain(|id| id != article_id);
            Toggle::Removed
        } else {
            upvotes.push(article_id.to_string());
            Toggle::Added
        };
        self.persist(StorageKey::Upvotes, &upvotes)?;

        let mut articles: Vec<Article> = match self.load_for_update(StorageKey::Articles) {
            Ok(articles) => articles,
            Err(_) => return Ok(toggle),
        };
        if let Some(article) = articles.iter_mut().find(|a| a.id == article_id) {
            article.upvotes += match toggle {
                Toggle::Added => 1,
                Toggle::Removed => -1,
            };
            if !self.set(StorageKey::Articles, &articles) {
                tracing::warn!(article_id = %article_id, "Failed to update cached upvote count");
            }
        }

        Ok(toggle)
    }

    // ========================================================================
    // Article Cache
    // ========================================================================

    /// Articles to display, preferring the cache over `defaults`.
    ///
    /// The cache wins when it is non-empty and holds at least as many articles
    /// as `defaults`; cached counts already include the user's upvotes. A
    /// shorter (stale) or unreadable cache is replaced by `defaults`, with one
    /// extra upvote applied to every article the user has upvoted.
    pub fn load_articles(&self, defaults: &[Article]) -> Vec<Article> {
        let cached: Vec<Article> = self.get(StorageKey::Articles, Vec::new());
        if !cached.is_empty() && cached.len() >= defaults.len() {
            return cached;
        }

        if !cached.is_empty() {
            tracing::info!(
                cached = cached.len(),
                defaults = defaults.len(),
                "Article cache is stale, using defaults"
            );
        }

        let upvoted = self.upvotes();
        defaults
            .iter()
            .cloned()
            .map(|mut article| {
                if upvoted.contains(&article.id) {
                    article.upvotes += 1;
                }
                article
            })
            .collect()
    }

    pub fn save_articles(&self, articles: &[Article]) -> bool {
        if articles.is_empty() {
            return false;
        }
        self.set(StorageKey::Articles, articles)
    }

    // ========================================================================
    // Newsletter
    // ========================================================================

    pub fn subscribers(&self) -> Vec<String> {
        self.get(StorageKey::Newsletter, Vec::new())
    }

    /// Whether this browser profile has ever subscribed.
    pub fn is_subscribed(&self) -> bool {
        self.get(StorageKey::NewsletterSubscribed, false)
    }

    /// Add `email` (trimmed, lowercased) to the subscriber list.
    pub fn subscribe(&self, email: &str) -> Result<Subscription, StorageError> {
        let email = normalize_email(email);
        let mut subscribers: Vec<String> = self.load_for_update(StorageKey::Newsletter)?;
        if subscribers.contains(&email) {
            return Ok(Subscription::AlreadySubscribed);
        }

        subscribers.push(email);
        self.persist(StorageKey::Newsletter, &subscribers)?;
        // Serializes as the literal text "true"
        self.persist(StorageKey::NewsletterSubscribed, &true)?;
        Ok(Subscription::New)
    }

    // ========================================================================
    // Contact Messages
    // ========================================================================

    pub fn contact_messages(&self) -> Vec<ContactMessage> {
        self.get(StorageKey::ContactMessages, Vec::new())
    }

    /// Stamp `draft` with the current time and an id, then append it to the log.
    pub fn record_contact_message(
        &self,
        draft: ContactDraft,
    ) -> Result<ContactMessage, StorageError> {
        let timestamp = Utc::now().timestamp_millis();
        let message = ContactMessage {
            name: draft.name,
            email: draft.email,
            subject: draft.subject,
            message: draft.message,
            timestamp,
            id: format!("msg-{timestamp}"),
        };

        let mut messages: Vec<ContactMessage> =
            self.load_for_update(StorageKey::ContactMessages)?;
        messages.push(message.clone());
        self.persist(StorageKey::ContactMessages, &messages)?;
        Ok(message)
    }
}
