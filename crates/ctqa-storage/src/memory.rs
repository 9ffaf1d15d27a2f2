//! 内存存储

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use ctqa_core::{
    ProfileStore, RegionResult, Result, ScannerIdentity, ScannerProfile, SeriesStore,
};
use tokio::sync::RwLock;
use tracing::debug;

/// 内存档案存储
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<BTreeMap<ScannerIdentity, ScannerProfile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get(&self, identity: &ScannerIdentity) -> Result<Option<ScannerProfile>> {
        Ok(self.profiles.read().await.get(identity).cloned())
    }

    async fn create_default(&self, identity: &ScannerIdentity) -> Result<ScannerProfile> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .entry(identity.clone())
            .or_insert_with(|| ScannerProfile::with_defaults(identity));
        Ok(profile.clone())
    }

    async fn update(&self, profile: ScannerProfile) -> Result<()> {
        profile.validate()?;
        self.profiles
            .write()
            .await
            .insert(profile.identity(), profile);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<ScannerIdentity>> {
        Ok(self.profiles.read().await.keys().cloned().collect())
    }

    async fn remove(&self, identity: &ScannerIdentity) -> Result<Option<ScannerProfile>> {
        Ok(self.profiles.write().await.remove(identity))
    }
}

/// 内存时间序列存储
#[derive(Debug, Default)]
pub struct InMemorySeriesStore {
    series: RwLock<BTreeMap<ScannerIdentity, BTreeMap<NaiveDate, RegionResult>>>,
}

impl InMemorySeriesStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SeriesStore for InMemorySeriesStore {
    async fn upsert(
        &self,
        identity: &ScannerIdentity,
        date: NaiveDate,
        result: RegionResult,
    ) -> Result<()> {
        debug!("写入内存时间序列: {} {}", identity, date);
        self.series
            .write()
            .await
            .entry(identity.clone())
            .or_default()
            .insert(date, result);
        Ok(())
    }

    async fn load_all(
        &self,
        identity: &ScannerIdentity,
    ) -> Result<BTreeMap<NaiveDate, RegionResult>> {
        Ok(self
            .series
            .read()
            .await
            .get(identity)
            .cloned()
            .unwrap_or_default())
    }

    async fn scanners(&self) -> Result<Vec<ScannerIdentity>> {
        Ok(self.series.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctqa_core::CenterStats;

    fn identity() -> ScannerIdentity {
        ScannerIdentity::new("ct1", "siemens", "force", "north campus")
    }

    fn result(mean: f64) -> RegionResult {
        RegionResult {
            center: Some(CenterStats { mean, std: 1.0 }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_profile_create_is_idempotent() {
        let store = InMemoryProfileStore::new();
        let mut created = store.create_default(&identity()).await.unwrap();
        created.upper_limit = Some(3.0);
        store.update(created.clone()).await.unwrap();

        // 已存在时不覆盖
        let again = store.create_default(&identity()).await.unwrap();
        assert_eq!(again, created);

        assert_eq!(store.remove(&identity()).await.unwrap(), Some(created));
        assert!(store.get(&identity()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_profile_update_validates() {
        let store = InMemoryProfileStore::new();
        let mut profile = ScannerProfile::with_defaults(&identity());
        profile.upper_limit = Some(-1.0);
        profile.lower_limit = Some(1.0);
        assert!(store.update(profile).await.is_err());
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_series_upsert_overwrites_same_date() {
        let store = InMemorySeriesStore::new();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        store.upsert(&identity(), date, result(1.0)).await.unwrap();
        store.upsert(&identity(), date, result(2.0)).await.unwrap();

        let series = store.load_all(&identity()).await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[&date].center_mean(), Some(2.0));
        assert_eq!(store.scanners().await.unwrap(), vec![identity()]);

        let other = ScannerIdentity::new("ct2", "siemens", "force", "north campus");
        assert!(store.load_all(&other).await.unwrap().is_empty());
    }
}
