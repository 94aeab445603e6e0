//! Palette color lookup tables and their cache.
//!
//! Palette color lookup tables are often shared by many instances
//! of a series (or of a whole archive),
//! so decoded tables are cached by their
//! Palette Color Lookup Table UID (0028,1199)
//! for a limited time.
use std::sync::Arc;
use std::time::Duration;

use dicom_core::Tag;
use futures_util::future::try_join3;
use moka::future::Cache;
use serde::Serialize;

use crate::bulk::{BulkDataError, BulkDataFetcher, BulkDataResolver};
use crate::dictionary::TagValue;

/// How long a decoded table is kept by default: 24 hours.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// The decoded red, green and blue channels of a palette.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaletteColors {
    pub red: Vec<u16>,
    pub green: Vec<u16>,
    pub blue: Vec<u16>,
}

/// The delivered data of one palette channel.
#[derive(Debug, Clone, PartialEq)]
pub struct LutChannel {
    /// the tag of the lookup table data attribute
    pub tag: Tag,
    /// the lookup table data
    pub data: Option<TagValue>,
    /// the lookup table descriptor values
    pub descriptor: Option<Vec<f64>>,
}

/// Everything needed to resolve the palette of an instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PaletteRequest {
    /// the Palette Color Lookup Table UID, if any
    pub lut_uid: Option<String>,
    pub red: LutChannel,
    pub green: LutChannel,
    pub blue: LutChannel,
}

/// A time-bounded cache of decoded palettes,
/// keyed by lookup table UID.
///
/// The cache may be shared between tasks.
/// Concurrent resolutions of the same table share a single load.
#[derive(Debug, Clone)]
pub struct PaletteColorCache {
    inner: Cache<String, Arc<PaletteColors>>,
}

impl Default for PaletteColorCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PaletteColorCache {
    /// Create a cache with the default maximum age.
    pub fn new() -> Self {
        Self::with_max_age(DEFAULT_MAX_AGE)
    }

    /// Create a cache whose entries expire `max_age` after insertion.
    pub fn with_max_age(max_age: Duration) -> Self {
        PaletteColorCache {
            inner: Cache::builder().time_to_live(max_age).build(),
        }
    }

    /// Retrieve an unexpired palette.
    pub async fn get(&self, lut_uid: &str) -> Option<Arc<PaletteColors>> {
        if lut_uid.is_empty() {
            return None;
        }
        self.inner.get(lut_uid).await
    }

    /// Whether an unexpired palette is cached under `lut_uid`.
    pub fn contains(&self, lut_uid: &str) -> bool {
        self.inner.contains_key(lut_uid)
    }

    /// Cache a palette.
    /// Palettes without a lookup table UID are not cached.
    pub async fn insert(&self, lut_uid: &str, colors: Arc<PaletteColors>) {
        if lut_uid.is_empty() {
            return;
        }
        self.inner.insert(lut_uid.to_string(), colors).await;
    }

    /// The number of cached palettes, after evicting expired ones.
    pub async fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }

    /// Drop every cached palette.
    pub fn clear(&self) {
        self.inner.invalidate_all();
    }

    /// Obtain the palette described by `request`.
    ///
    /// A valid cached palette is returned without fetching or decoding.
    /// Otherwise the three channels are resolved concurrently
    /// and the palette is cached once all of them succeed.
    /// Tasks missing the same table at once wait on the same load.
    pub async fn resolve<F>(
        &self,
        request: &PaletteRequest,
        resolver: &BulkDataResolver<'_, F>,
    ) -> Result<Arc<PaletteColors>, Arc<BulkDataError>>
    where
        F: BulkDataFetcher + ?Sized,
    {
        let load = async {
            let (red, green, blue) = try_join3(
                resolve_channel(resolver, &request.red),
                resolve_channel(resolver, &request.green),
                resolve_channel(resolver, &request.blue),
            )
            .await?;
            Ok::<_, BulkDataError>(Arc::new(PaletteColors { red, green, blue }))
        };

        match request.lut_uid.as_deref().filter(|uid| !uid.is_empty()) {
            Some(uid) => {
                tracing::debug!("Resolving palette color lookup table {}", uid);
                self.inner.try_get_with(uid.to_string(), load).await
            }
            None => load.await.map_err(Arc::new),
        }
    }
}

async fn resolve_channel<F>(
    resolver: &BulkDataResolver<'_, F>,
    channel: &LutChannel,
) -> Result<Vec<u16>, BulkDataError>
where
    F: BulkDataFetcher + ?Sized,
{
    resolver
        .resolve_lut(channel.tag, channel.data.as_ref(), channel.descriptor.as_deref())
        .await
}
