//! Application processing: resolving the newest allowed tag per image.
//!
//! [`ImageUpdater`] is the shipped [`ApplicationProcessor`]: for each image
//! policy it looks up the endpoint, refreshes credentials, lists tags
//! (memoized per cycle), fetches per-candidate metadata when the strategy
//! needs it (checking the endpoint's tag cache first), resolves the newest
//! allowed tag and emits an [`ImageUpdate`] record for the caller's
//! write-back machinery.

use std::sync::Arc;

use async_trait::async_trait;

use tagwatch_core::{ImagePolicy, ImageTag, ImageTagList, UpdateStrategy};
use tagwatch_registry::{RegistryClient, RegistryContext};

use crate::application::Application;
use crate::error::Result;
use crate::result::{ApplicationResult, ImageUpdate};
use crate::state::SyncIterationState;

/// Processes one application within a cycle.
///
/// The orchestrator is generic over this trait so tests can instrument
/// processing without a registry behind it.
#[async_trait]
pub trait ApplicationProcessor: Send + Sync {
    /// Processes every image of one application.
    async fn process(
        &self,
        application: &Application,
        state: &SyncIterationState,
    ) -> Result<ApplicationResult>;
}

/// The production processor, backed by the registry engine.
pub struct ImageUpdater {
    context: Arc<RegistryContext>,
}

impl ImageUpdater {
    /// Creates an updater over the shared registry context.
    #[must_use]
    pub fn new(context: Arc<RegistryContext>) -> Self {
        Self { context }
    }

    async fn check_image(
        &self,
        policy: &ImagePolicy,
        state: &SyncIterationState,
    ) -> Result<Option<ImageUpdate>> {
        let constraint = policy.to_constraint()?;
        let client = self.context.client_for(&policy.image).await?;

        if client.endpoint().ping && state.first_contact(&client.endpoint().api_url) {
            client.ping().await?;
        }

        let names = self.cycle_tags(&client, state).await?;

        let image_key = policy.image.endpoint_key();
        let candidates = ImageTagList::new();
        for name in names.iter() {
            if constraint.strategy.wants_only_constraint_tag() && *name != constraint.constraint {
                continue;
            }
            if !constraint.match_tag.matches(name) || constraint.is_tag_ignored(name) {
                continue;
            }

            if constraint.strategy.needs_metadata() || constraint.options.metadata_required {
                match self
                    .tag_with_metadata(&client, &constraint, &image_key, name)
                    .await
                {
                    Ok(Some(tag)) => candidates.add(tag),
                    Ok(None) => {} // no platform-matching manifest
                    Err(error) => {
                        tracing::warn!(
                            image = %policy.image,
                            tag = name.as_str(),
                            error = %error,
                            "could not fetch tag metadata, excluding tag"
                        );
                    }
                }
            } else {
                candidates.add(ImageTag::new(name.clone()));
            }
        }

        let Some(newest) = constraint.resolve(&policy.image.name, &candidates)? else {
            return Ok(None);
        };

        // The digest strategy always reports: the digest behind the tracked
        // tag is the object of comparison and only the caller knows the
        // currently deployed one. Other strategies report only a tag change.
        let current_tag = policy.image.tag_name.clone();
        if constraint.strategy != UpdateStrategy::Digest
            && current_tag.as_deref() == Some(newest.name.as_str())
        {
            return Ok(None);
        }

        tracing::info!(
            image = %policy.image,
            new_tag = %newest,
            strategy = %constraint.strategy,
            "found newer tag"
        );
        Ok(Some(ImageUpdate {
            image: policy.image.clone(),
            current_tag,
            new_tag: newest,
            strategy: constraint.strategy,
        }))
    }

    /// Lists tags through the cycle memo so an image shared by several
    /// applications is fetched once per cycle.
    async fn cycle_tags(
        &self,
        client: &RegistryClient,
        state: &SyncIterationState,
    ) -> Result<Arc<Vec<String>>> {
        let key = client.cache_key();
        if let Some(cached) = state.cached_tags(&key) {
            return Ok(cached);
        }
        let tags = Arc::new(client.tags().await?);
        state.store_tags(key, tags.clone());
        Ok(tags)
    }

    async fn tag_with_metadata(
        &self,
        client: &RegistryClient,
        constraint: &tagwatch_core::VersionConstraint,
        image_key: &str,
        name: &str,
    ) -> Result<Option<ImageTag>> {
        let cacheable = constraint.strategy.is_cacheable();
        if cacheable {
            if let Some(info) = client.endpoint().tag_cache().get(image_key, name) {
                return Ok(Some(ImageTag::with_metadata(name, info.digest, info.created_at)));
            }
        }

        let manifest = client.manifest_for_tag(name).await?;
        let Some(info) = client.tag_metadata(&manifest, &constraint.options).await? else {
            return Ok(None);
        };

        if cacheable {
            client.endpoint().tag_cache().put(image_key, name, info.clone());
        }
        Ok(Some(ImageTag::with_metadata(
            name,
            info.digest,
            info.created_at,
        )))
    }
}

#[async_trait]
impl ApplicationProcessor for ImageUpdater {
    async fn process(
        &self,
        application: &Application,
        state: &SyncIterationState,
    ) -> Result<ApplicationResult> {
        let mut result = ApplicationResult::new(&application.name);

        for policy in &application.policies {
            result.considered += 1;
            match self.check_image(policy, state).await {
                Ok(Some(update)) => {
                    result.updated += 1;
                    result.updates.push(update);
                }
                Ok(None) => result.skipped += 1,
                Err(error) => {
                    tracing::error!(
                        application = %application.name,
                        image = %policy.image,
                        error = %error,
                        "failed to check image for updates"
                    );
                    result.errors += 1;
                }
            }
        }

        Ok(result)
    }
}
