use super::DashboardStore;
use crate::{error::BatchResult, geocode::CachedGeocode, types::Coordinate};
use rusqlite::{params, OptionalExtension};

impl DashboardStore {
    pub fn cached_geocode(&self, address: &str) -> BatchResult<Option<CachedGeocode>> {
        let cached = self
            .conn
            .query_row(
                "SELECT latitude, longitude, resolved, attempts
                 FROM geocode_cache WHERE address = ?1",
                params![address],
                |row| {
                    Ok(CachedGeocode {
                        coordinate: Coordinate::new(row.get(0)?, row.get(1)?),
                        resolved:   row.get::<_, i64>(2)? != 0,
                        attempts:   row.get::<_, i64>(3)? as u32,
                    })
                },
            )
            .optional()?;
        Ok(cached)
    }

    pub fn put_geocode(&self, address: &str, entry: &CachedGeocode) -> BatchResult<()> {
        self.conn.execute(
            "INSERT INTO geocode_cache (address, latitude, longitude, resolved, attempts, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(address) DO UPDATE SET
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                resolved = excluded.resolved,
                attempts = excluded.attempts,
                updated_at = excluded.updated_at",
            params![
                address,
                entry.coordinate.latitude,
                entry.coordinate.longitude,
                entry.resolved as i64,
                entry.attempts as i64,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn geocode_cache_size(&self) -> BatchResult<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM geocode_cache", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}
