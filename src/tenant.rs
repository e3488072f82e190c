use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;

/// One scheduling engine per court system. Each tenant gets its own Engine,
/// WAL and compactor; the tenant is the database name of the connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

/// File stem for a tenant's WAL. Anything outside `[A-Za-z0-9_-]` is dropped,
/// so database names can never escape the data directory.
fn wal_stem(tenant: &str) -> io::Result<String> {
    if tenant.len() > MAX_TENANT_NAME_LEN {
        return Err(io::Error::new(ErrorKind::InvalidInput, "tenant name too long"));
    }
    let stem: String = tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-'))
        .collect();
    if stem.is_empty() {
        return Err(io::Error::new(ErrorKind::InvalidInput, "empty tenant name"));
    }
    Ok(stem)
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Engine for a database name, opened from its WAL on first use.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        let stem = wal_stem(tenant)?;
        if let Some(engine) = self.engines.get(&stem) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        // Opened under the entry lock: two racing connections must not replay
        // and append to the same WAL through separate engines.
        let engine = match self.engines.entry(stem.clone()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => slot.insert(self.open_engine(&stem)?).value().clone(),
        };
        let loaded = self.engines.len();
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(loaded as f64);
        info!("tenant {stem} ready ({loaded} loaded)");
        Ok(engine)
    }

    fn open_engine(&self, stem: &str) -> io::Result<Arc<Engine>> {
        let wal_path = self.data_dir.join(format!("{stem}.wal"));
        let engine = Arc::new(Engine::new(wal_path, Arc::new(NotifyHub::new()))?);
        tokio::spawn(compactor::run_compactor(engine.clone(), self.compact_threshold));
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::HearingRequest;
    use crate::model::*;
    use chrono::NaiveDate;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("courtcal_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn court(id: Ulid) -> Court {
        Court {
            id,
            name: "Courtroom 1".into(),
            location: None,
            capacity: 30,
            opens: 540,
            closes: 720,
            slot_minutes: 60,
            overlap: OverlapPolicy::Strict,
        }
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        let tm = TenantManager::new(dir, 1000);

        let eng_a = tm.get_or_create("district_a").unwrap();
        let eng_b = tm.get_or_create("district_b").unwrap();

        // Same court and case ids in both tenants.
        let court_id = Ulid::new();
        let case_id = Ulid::new();
        for eng in [&eng_a, &eng_b] {
            eng.create_court(court(court_id)).await.unwrap();
            eng.open_case(case_id).await.unwrap();
        }

        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        eng_a
            .schedule_hearing(HearingRequest {
                case_id,
                court_id,
                date,
                time: 600,
                notes: None,
            })
            .await
            .unwrap();

        assert_eq!(eng_a.available_slots(court_id, date).await.unwrap().len(), 2);
        assert_eq!(eng_b.available_slots(court_id, date).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = TenantManager::new(dir.clone(), 1000);

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = tm.get_or_create("my_db").unwrap();
        assert!(dir.join("my_db.wal").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = TenantManager::new(dir, 1000);

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = TenantManager::new(dir.clone(), 1000);

        let _eng = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        assert!(tm.get_or_create("../..").is_err());
    }

    #[tokio::test]
    async fn names_sanitizing_alike_share_an_engine() {
        let dir = test_data_dir("sanitize_alias");
        let tm = TenantManager::new(dir, 1000);

        let a = tm.get_or_create("county/east").unwrap();
        let b = tm.get_or_create("countyeast").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = TenantManager::new(dir, 1000);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let dir = test_data_dir("count_limit");
        let tm = TenantManager::new(dir, 1000);

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let err = tm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
    }

    #[tokio::test]
    async fn tenant_reopens_from_wal() {
        let dir = test_data_dir("reopen");
        let court_id = Ulid::new();
        {
            let tm = TenantManager::new(dir.clone(), 1000);
            let eng = tm.get_or_create("county").unwrap();
            eng.create_court(court(court_id)).await.unwrap();
        }
        let tm = TenantManager::new(dir, 1000);
        let eng = tm.get_or_create("county").unwrap();
        assert_eq!(eng.get_court(&court_id).unwrap().name, "Courtroom 1");
    }
}
