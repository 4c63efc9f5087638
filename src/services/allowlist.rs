use crate::config::{AllowListConfig, EmailNormalization};
use crate::error::{AppError, AppResult};
use crate::models::allowlist::{AllowListAddition, AllowListEntry, AllowListRemoval};
use crate::models::wire::{AllowListAddRequest, AllowListDeleteRequest, AllowListQuery};
use crate::services::remote::ExportApi;
use crate::services::validation::InputValidator;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Advisory listing cache keyed by search prefix. Never authoritative; any
/// successful mutation clears it.
struct ListingCache {
    entries: RwLock<HashMap<String, Vec<AllowListEntry>>>,
    generation: AtomicU64,
}

impl ListingCache {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    async fn get(&self, key: &str) -> Option<Vec<AllowListEntry>> {
        self.entries.read().await.get(key).cloned()
    }

    /// Stores a listing unless a mutation happened after it was requested.
    async fn store(&self, key: String, seen: u64, entries: Vec<AllowListEntry>) {
        let mut cached = self.entries.write().await;
        if self.generation.load(Ordering::SeqCst) == seen {
            cached.insert(key, entries);
        }
    }

    async fn invalidate(&self) {
        let mut cached = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        if !cached.is_empty() {
            debug!("Invalidating {} cached allow-list listings", cached.len());
            cached.clear();
        }
    }
}

/// Manages the remote allow-list. Adds and removes are idempotent from the
/// caller's point of view.
pub struct AllowListManager {
    api: Arc<ExportApi>,
    validator: Arc<InputValidator>,
    normalization: EmailNormalization,
    cache: Option<ListingCache>,
}

impl AllowListManager {
    pub fn new(api: Arc<ExportApi>, validator: Arc<InputValidator>, config: &AllowListConfig) -> Self {
        Self {
            api,
            validator,
            normalization: config.email_normalization,
            cache: config.cache_enabled.then(ListingCache::new),
        }
    }

    /// Adds `email`. Adding an address that is already listed succeeds and
    /// returns the stored entry.
    #[instrument(skip(self, comment))]
    pub async fn add(&self, email: &str, comment: Option<&str>) -> AppResult<AllowListAddition> {
        self.validator.validate_email(email, "email")?;
        if let Some(comment) = comment {
            self.validator.validate_comment(comment)?;
        }
        let email = self.normalization.apply(email);

        let request = AllowListAddRequest {
            email: email.clone(),
            comment: comment.map(str::to_string),
        };
        let response = self.api.allowlist_add(&request).await?;
        self.invalidate().await;

        if !response.added {
            warn!(email = %email, "Remote did not confirm the allow-list add");
        }

        let entry = match self.find_entry(&email).await? {
            Some(entry) => entry,
            None => {
                warn!(email = %email, "Added address not visible in listing yet");
                AllowListEntry {
                    email: response.email,
                    detail: request.comment,
                    created_at: Utc::now(),
                }
            }
        };

        info!(email = %entry.email, "Allow-list entry added");
        Ok(AllowListAddition {
            added: response.added,
            entry,
        })
    }

    /// Removes `email`. Removing an address that is not listed is not an error.
    #[instrument(skip(self))]
    pub async fn remove(&self, email: &str) -> AppResult<AllowListRemoval> {
        self.validator.validate_email(email, "email")?;
        let email = self.normalization.apply(email);

        let request = AllowListDeleteRequest { email: email.clone() };
        let removal = match self.api.allowlist_delete(&request).await {
            Ok(response) => AllowListRemoval {
                email: response.email,
                deleted: response.deleted,
            },
            Err(AppError::NotFound { .. }) => {
                debug!(email = %email, "Address was not on the allow-list");
                AllowListRemoval { email, deleted: false }
            }
            Err(e) => return Err(e),
        };

        self.invalidate().await;
        info!(email = %removal.email, deleted = removal.deleted, "Allow-list removal processed");
        Ok(removal)
    }

    /// Lists entries whose address starts with `prefix` (all entries if none).
    /// Nothing is fetched until the returned listing is streamed.
    pub fn list(&self, prefix: Option<&str>) -> AppResult<AllowListListing<'_>> {
        let prefix = match prefix {
            Some(raw) => {
                self.validator.validate_email_prefix(raw)?;
                Some(self.normalization.apply(raw)).filter(|p| !p.is_empty())
            }
            None => None,
        };
        Ok(AllowListListing { manager: self, prefix })
    }

    async fn fetch(&self, prefix: Option<String>) -> AppResult<Vec<AllowListEntry>> {
        let key = prefix.clone().unwrap_or_default();
        let seen = match &self.cache {
            Some(cache) => {
                if let Some(entries) = cache.get(&key).await {
                    debug!(prefix = %key, "Serving allow-list listing from cache");
                    return Ok(entries);
                }
                Some(cache.generation.load(Ordering::SeqCst))
            }
            None => None,
        };

        let entries: Vec<AllowListEntry> = self
            .api
            .allowlist_list(&AllowListQuery { email: prefix })
            .await?
            .into_iter()
            .map(AllowListEntry::from)
            .collect();

        if let (Some(cache), Some(seen)) = (&self.cache, seen) {
            cache.store(key, seen, entries.clone()).await;
        }
        Ok(entries)
    }

    async fn find_entry(&self, email: &str) -> AppResult<Option<AllowListEntry>> {
        let entries = self
            .api
            .allowlist_list(&AllowListQuery {
                email: Some(email.to_string()),
            })
            .await?;

        let mut candidates = entries.into_iter().map(AllowListEntry::from);
        Ok(match self.normalization {
            EmailNormalization::Preserve => candidates.find(|entry| entry.email == email),
            EmailNormalization::Lowercase => candidates.find(|entry| entry.email.eq_ignore_ascii_case(email)),
        })
    }

    async fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate().await;
        }
    }
}

/// A restartable allow-list query. Each call to [`AllowListListing::stream`]
/// issues a fresh fetch (subject to the advisory cache).
pub struct AllowListListing<'a> {
    manager: &'a AllowListManager,
    prefix: Option<String>,
}

impl<'a> AllowListListing<'a> {
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn stream(&self) -> BoxStream<'a, AppResult<AllowListEntry>> {
        let manager = self.manager;
        let prefix = self.prefix.clone();

        stream::once(async move { manager.fetch(prefix).await })
            .map(|result| match result {
                Ok(entries) => stream::iter(entries.into_iter().map(Ok::<AllowListEntry, AppError>)).left_stream(),
                Err(e) => stream::iter(std::iter::once(Err(e))).right_stream(),
            })
            .flatten()
            .boxed()
    }

    pub async fn collect(&self) -> AppResult<Vec<AllowListEntry>> {
        self.manager.fetch(self.prefix.clone()).await
    }
}
