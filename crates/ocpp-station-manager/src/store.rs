//! Persistent record store seam and its in-memory implementation

use crate::model::{
    ChargingProfileRecord, ChargingStation, Lock, SiteArea, TenantId, Transaction,
};
use crate::CsmsResult;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

/// Key/value and query interface over the platform's records, scoped by tenant
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_charging_station(
        &self,
        tenant: &TenantId,
        id: &str,
    ) -> CsmsResult<Option<ChargingStation>>;
    async fn save_charging_station(
        &self,
        tenant: &TenantId,
        station: &ChargingStation,
    ) -> CsmsResult<()>;
    /// Apply `update` to the stored station while holding its record.
    ///
    /// Returns the station as written, or `None` when it does not exist. An
    /// error from `update` leaves the record unchanged. Partial writers use
    /// this instead of a load then save so concurrent changes to other fields
    /// are kept.
    async fn update_charging_station(
        &self,
        tenant: &TenantId,
        id: &str,
        update: &mut (dyn for<'s> FnMut(&'s mut ChargingStation) -> CsmsResult<()> + Send),
    ) -> CsmsResult<Option<ChargingStation>>;
    async fn delete_charging_station(&self, tenant: &TenantId, id: &str) -> CsmsResult<()>;
    async fn charging_stations_in_site_area(
        &self,
        tenant: &TenantId,
        site_area_id: &str,
    ) -> CsmsResult<Vec<ChargingStation>>;

    async fn get_transaction(&self, tenant: &TenantId, id: i32)
        -> CsmsResult<Option<Transaction>>;
    async fn save_transaction(&self, tenant: &TenantId, transaction: &Transaction)
        -> CsmsResult<()>;

    async fn get_charging_profile(
        &self,
        tenant: &TenantId,
        id: &str,
    ) -> CsmsResult<Option<ChargingProfileRecord>>;
    async fn charging_profiles_for_station(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
    ) -> CsmsResult<Vec<ChargingProfileRecord>>;
    async fn save_charging_profile(
        &self,
        tenant: &TenantId,
        record: &ChargingProfileRecord,
    ) -> CsmsResult<()>;
    async fn delete_charging_profile(&self, tenant: &TenantId, id: &str) -> CsmsResult<()>;

    async fn get_site_area(&self, tenant: &TenantId, id: &str) -> CsmsResult<Option<SiteArea>>;
    async fn save_site_area(&self, tenant: &TenantId, site_area: &SiteArea) -> CsmsResult<()>;

    /// Create the lock unless a non-expired lock holds the same resource.
    ///
    /// Must be atomic: of two concurrent calls for one resource at most one
    /// returns `true`.
    async fn try_acquire_lock(&self, lock: &Lock) -> CsmsResult<bool>;

    /// Remove the lock if it is still the one stored for its resource
    async fn release_lock(&self, lock: &Lock) -> CsmsResult<bool>;
}

type Scoped<K> = (TenantId, K);

/// DashMap backed store for tests and single process deployments
#[derive(Default)]
pub struct MemoryStore {
    stations: DashMap<Scoped<String>, ChargingStation>,
    transactions: DashMap<Scoped<i32>, Transaction>,
    profiles: DashMap<Scoped<String>, ChargingProfileRecord>,
    site_areas: DashMap<Scoped<String>, SiteArea>,
    locks: DashMap<Scoped<String>, Lock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored charging profiles across tenants
    pub fn charging_profile_count(&self) -> usize {
        self.profiles.len()
    }

    /// Locks currently stored, expired ones included
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}

fn scoped<K>(tenant: &TenantId, key: K) -> Scoped<K> {
    (tenant.clone(), key)
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_charging_station(
        &self,
        tenant: &TenantId,
        id: &str,
    ) -> CsmsResult<Option<ChargingStation>> {
        Ok(self
            .stations
            .get(&scoped(tenant, id.to_string()))
            .map(|s| s.clone()))
    }

    async fn save_charging_station(
        &self,
        tenant: &TenantId,
        station: &ChargingStation,
    ) -> CsmsResult<()> {
        self.stations
            .insert(scoped(tenant, station.id.clone()), station.clone());
        Ok(())
    }

    async fn update_charging_station(
        &self,
        tenant: &TenantId,
        id: &str,
        update: &mut (dyn for<'s> FnMut(&'s mut ChargingStation) -> CsmsResult<()> + Send),
    ) -> CsmsResult<Option<ChargingStation>> {
        // The guard holds the shard write lock until the new value is in place
        let Some(mut entry) = self.stations.get_mut(&scoped(tenant, id.to_string())) else {
            return Ok(None);
        };
        let mut station = entry.value().clone();
        update(&mut station)?;
        *entry.value_mut() = station.clone();
        Ok(Some(station))
    }

    async fn delete_charging_station(&self, tenant: &TenantId, id: &str) -> CsmsResult<()> {
        self.stations.remove(&scoped(tenant, id.to_string()));
        Ok(())
    }

    async fn charging_stations_in_site_area(
        &self,
        tenant: &TenantId,
        site_area_id: &str,
    ) -> CsmsResult<Vec<ChargingStation>> {
        let mut stations: Vec<ChargingStation> = self
            .stations
            .iter()
            .filter(|entry| {
                entry.key().0 == *tenant
                    && entry.value().site_area_id.as_deref() == Some(site_area_id)
            })
            .map(|entry| entry.value().clone())
            .collect();
        stations.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(stations)
    }

    async fn get_transaction(
        &self,
        tenant: &TenantId,
        id: i32,
    ) -> CsmsResult<Option<Transaction>> {
        Ok(self.transactions.get(&scoped(tenant, id)).map(|t| t.clone()))
    }

    async fn save_transaction(
        &self,
        tenant: &TenantId,
        transaction: &Transaction,
    ) -> CsmsResult<()> {
        self.transactions
            .insert(scoped(tenant, transaction.id), transaction.clone());
        Ok(())
    }

    async fn get_charging_profile(
        &self,
        tenant: &TenantId,
        id: &str,
    ) -> CsmsResult<Option<ChargingProfileRecord>> {
        Ok(self
            .profiles
            .get(&scoped(tenant, id.to_string()))
            .map(|p| p.clone()))
    }

    async fn charging_profiles_for_station(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
    ) -> CsmsResult<Vec<ChargingProfileRecord>> {
        let mut records: Vec<ChargingProfileRecord> = self
            .profiles
            .iter()
            .filter(|entry| {
                entry.key().0 == *tenant && entry.value().charging_station_id == charging_station_id
            })
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn save_charging_profile(
        &self,
        tenant: &TenantId,
        record: &ChargingProfileRecord,
    ) -> CsmsResult<()> {
        self.profiles
            .insert(scoped(tenant, record.id.clone()), record.clone());
        Ok(())
    }

    async fn delete_charging_profile(&self, tenant: &TenantId, id: &str) -> CsmsResult<()> {
        self.profiles.remove(&scoped(tenant, id.to_string()));
        Ok(())
    }

    async fn get_site_area(&self, tenant: &TenantId, id: &str) -> CsmsResult<Option<SiteArea>> {
        Ok(self
            .site_areas
            .get(&scoped(tenant, id.to_string()))
            .map(|s| s.clone()))
    }

    async fn save_site_area(&self, tenant: &TenantId, site_area: &SiteArea) -> CsmsResult<()> {
        self.site_areas
            .insert(scoped(tenant, site_area.id.clone()), site_area.clone());
        Ok(())
    }

    async fn try_acquire_lock(&self, lock: &Lock) -> CsmsResult<bool> {
        let now = Utc::now();
        // The entry guard holds the shard write lock, which makes this a test-and-set
        let acquired = match self.locks.entry(scoped(&lock.tenant, lock.resource())) {
            Entry::Vacant(slot) => {
                slot.insert(lock.clone());
                true
            }
            Entry::Occupied(mut slot) => {
                if slot.get().is_expired(now) {
                    debug!(
                        "Replacing expired lock {} on {}",
                        slot.get().id,
                        lock.resource()
                    );
                    slot.insert(lock.clone());
                    true
                } else {
                    false
                }
            }
        };
        Ok(acquired)
    }

    async fn release_lock(&self, lock: &Lock) -> CsmsResult<bool> {
        Ok(self
            .locks
            .remove_if(&scoped(&lock.tenant, lock.resource()), |_, stored| {
                stored.id == lock.id
            })
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LockEntity;
    use chrono::Duration;

    fn lock(id: &str, key: &str, ttl_secs: i64) -> Lock {
        let now = Utc::now();
        Lock {
            id: id.to_string(),
            tenant: TenantId::from("t1"),
            entity: LockEntity::SiteArea,
            key: key.to_string(),
            holder: "test".to_string(),
            timestamp: now,
            expires_at: now + Duration::seconds(ttl_secs),
        }
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_released() {
        let store = MemoryStore::new();
        let first = lock("a", "SA-1", 60);
        let second = lock("b", "SA-1", 60);

        assert!(store.try_acquire_lock(&first).await.unwrap());
        assert!(!store.try_acquire_lock(&second).await.unwrap());
        // Another site area is independent
        assert!(store.try_acquire_lock(&lock("c", "SA-2", 60)).await.unwrap());

        // Releasing with a foreign lock id is a no-op
        assert!(!store.release_lock(&second).await.unwrap());
        assert!(store.release_lock(&first).await.unwrap());
        assert!(store.try_acquire_lock(&second).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_taken_over() {
        let store = MemoryStore::new();
        assert!(store.try_acquire_lock(&lock("old", "SA-1", -1)).await.unwrap());
        assert!(store.try_acquire_lock(&lock("new", "SA-1", 60)).await.unwrap());

        // The stale holder can no longer release the new lock
        assert!(!store.release_lock(&lock("old", "SA-1", 60)).await.unwrap());
        assert_eq!(store.lock_count(), 1);
    }

    #[tokio::test]
    async fn test_records_are_tenant_scoped() {
        let store = MemoryStore::new();
        let t1 = TenantId::from("t1");
        let t2 = TenantId::from("t2");

        let mut station = ChargingStation::new("CS-1", "ABB");
        station.site_area_id = Some("SA-1".to_string());
        store.save_charging_station(&t1, &station).await.unwrap();

        assert!(store.get_charging_station(&t1, "CS-1").await.unwrap().is_some());
        assert!(store.get_charging_station(&t2, "CS-1").await.unwrap().is_none());
        assert_eq!(
            store.charging_stations_in_site_area(&t1, "SA-1").await.unwrap().len(),
            1
        );
        assert!(store
            .charging_stations_in_site_area(&t2, "SA-1")
            .await
            .unwrap()
            .is_empty());

        store.delete_charging_station(&t1, "CS-1").await.unwrap();
        assert!(store.get_charging_station(&t1, "CS-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_station_update_keeps_other_fields() {
        let store = MemoryStore::new();
        let tenant = TenantId::from("t1");
        let mut station = ChargingStation::new("CS-1", "ABB");
        station.maximum_power = 22_000.0;
        store.save_charging_station(&tenant, &station).await.unwrap();

        let updated = store
            .update_charging_station(&tenant, "CS-1", &mut |s: &mut ChargingStation| {
                s.model = "Terra".to_string();
                Ok(())
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.model, "Terra");
        assert_eq!(updated.maximum_power, 22_000.0);

        // A failing update writes nothing
        let err = store
            .update_charging_station(&tenant, "CS-1", &mut |s: &mut ChargingStation| {
                s.maximum_power = 0.0;
                Err(crate::CsmsError::validation("refused"))
            })
            .await;
        assert!(err.is_err());
        let stored = store.get_charging_station(&tenant, "CS-1").await.unwrap().unwrap();
        assert_eq!(stored.maximum_power, 22_000.0);

        assert!(store
            .update_charging_station(&tenant, "CS-9", &mut |_: &mut ChargingStation| Ok(()))
            .await
            .unwrap()
            .is_none());
    }
}
