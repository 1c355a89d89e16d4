//! Reverse geocoding through OpenStreetMap Nominatim
//!
//! The upstream usage policy allows at most one request per second, so
//! every call passes through a durable rate gate: the last-call timestamp
//! lives in the settings table, which holds the limit across requests and
//! across process restarts. The clock is injected so tests can drive the
//! gate without real sleeps.
//!
//! Resolution never errors outward; any failure degrades to `None` and
//! the asset is stored without a place name.

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/reverse";
const USER_AGENT: &str = concat!("Pictor/", env!("CARGO_PKG_VERSION"), " (personal media gallery)");
const LAST_REQUEST_KEY: &str = "geocode_last_request_ms";

/// Time source for the rate gate.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation used in production.
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Durable one-call-per-interval gate.
pub struct RateGate {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    min_interval_ms: i64,
}

impl RateGate {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, min_interval: Duration) -> Self {
        Self {
            pool,
            clock,
            min_interval_ms: min_interval.as_millis() as i64,
        }
    }

    /// Block until at least the configured interval has passed since the
    /// previous call, then claim the current instant.
    pub async fn wait_turn(&self) -> Result<(), sqlx::Error> {
        let last: Option<String> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
                .bind(LAST_REQUEST_KEY)
                .fetch_optional(&self.pool)
                .await?;

        if let Some(last_ms) = last.and_then(|v| v.parse::<i64>().ok()) {
            let elapsed = self.clock.now_ms() - last_ms;
            if elapsed < self.min_interval_ms {
                let remainder = (self.min_interval_ms - elapsed) as u64;
                debug!(remainder_ms = remainder, "rate gate sleeping");
                self.clock.sleep(Duration::from_millis(remainder)).await;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(LAST_REQUEST_KEY)
        .bind(self.clock.now_ms().to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    display_name: Option<String>,
    address: Option<NominatimAddress>,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    country: Option<String>,
    country_code: Option<String>,
    state: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    suburb: Option<String>,
}

/// Rate-limited Nominatim client.
pub struct GeocodeClient {
    http: reqwest::Client,
    gate: RateGate,
}

impl GeocodeClient {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .timeout(Duration::from_secs(5))
                .build()
                .expect("Failed to build HTTP client (system error)"),
            gate: RateGate::new(pool, clock, Duration::from_secs(1)),
        }
    }

    /// Resolve coordinates to a place name; all failures become `None`.
    pub async fn resolve(&self, latitude: f64, longitude: f64) -> Option<String> {
        match self.try_resolve(latitude, longitude).await {
            Ok(place) => place,
            Err(e) => {
                warn!(latitude, longitude, error = %e, "reverse geocoding failed");
                None
            }
        }
    }

    async fn try_resolve(&self, latitude: f64, longitude: f64) -> anyhow::Result<Option<String>> {
        self.gate.wait_turn().await?;

        let response = self
            .http
            .get(NOMINATIM_URL)
            .query(&[
                ("format", "json".to_string()),
                ("lat", latitude.to_string()),
                ("lon", longitude.to_string()),
                ("zoom", "18".to_string()),
                ("addressdetails", "1".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("geocoding service returned {}", response.status());
        }

        let body: NominatimResponse = response.json().await?;
        Ok(build_place_name(&body))
    }
}

/// Build a compact place string, preferring the administrative
/// subdivisions natural to the detected country.
fn build_place_name(response: &NominatimResponse) -> Option<String> {
    let address = response.address.as_ref();
    let mut parts: Vec<&str> = Vec::new();

    if let Some(addr) = address {
        let locality = addr
            .city
            .as_deref()
            .or(addr.town.as_deref())
            .or(addr.village.as_deref());

        if addr.country_code.as_deref() == Some("jp") {
            // Japanese addresses read prefecture, municipality, district
            if let Some(state) = addr.state.as_deref() {
                parts.push(state);
            }
            if let Some(locality) = locality {
                parts.push(locality);
            }
            if let Some(suburb) = addr.suburb.as_deref() {
                parts.push(suburb);
            }
        } else {
            if let Some(locality) = locality {
                parts.push(locality);
            }
            if let Some(state) = addr.state.as_deref() {
                parts.push(state);
            }
            if let Some(country) = addr.country.as_deref() {
                parts.push(country);
            }
        }
    }

    if parts.is_empty() {
        return response
            .display_name
            .as_deref()
            .map(|name| name.chars().take(100).collect());
    }

    Some(parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Mutex;

    /// Instant clock: advances only when the gate sleeps, and records
    /// the total time slept.
    struct FakeClock {
        now_ms: Mutex<i64>,
        slept_ms: Mutex<u64>,
    }

    impl FakeClock {
        fn new() -> Self {
            Self {
                now_ms: Mutex::new(1_000_000),
                slept_ms: Mutex::new(0),
            }
        }

        fn total_slept_ms(&self) -> u64 {
            *self.slept_ms.lock().unwrap()
        }
    }

    #[async_trait]
    impl Clock for FakeClock {
        fn now_ms(&self) -> i64 {
            *self.now_ms.lock().unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            let ms = duration.as_millis() as i64;
            *self.now_ms.lock().unwrap() += ms;
            *self.slept_ms.lock().unwrap() += ms as u64;
        }
    }

    async fn settings_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        pictor_common::db::init::create_settings_table(&pool)
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn burst_of_calls_is_spread_a_second_apart() {
        let pool = settings_pool().await;
        let clock = Arc::new(FakeClock::new());
        let gate = RateGate::new(pool, clock.clone(), Duration::from_secs(1));

        let calls = 5;
        for _ in 0..calls {
            gate.wait_turn().await.unwrap();
        }

        // K calls take at least (K-1) seconds of clock time
        assert!(clock.total_slept_ms() >= (calls - 1) * 1000);
    }

    #[tokio::test]
    async fn first_call_does_not_sleep() {
        let pool = settings_pool().await;
        let clock = Arc::new(FakeClock::new());
        let gate = RateGate::new(pool, clock.clone(), Duration::from_secs(1));

        gate.wait_turn().await.unwrap();
        assert_eq!(clock.total_slept_ms(), 0);
    }

    #[tokio::test]
    async fn persisted_timestamp_gates_a_new_gate_instance() {
        let pool = settings_pool().await;
        let clock = Arc::new(FakeClock::new());

        let first = RateGate::new(pool.clone(), clock.clone(), Duration::from_secs(1));
        first.wait_turn().await.unwrap();

        // A fresh gate over the same store still honors the interval
        let second = RateGate::new(pool, clock.clone(), Duration::from_secs(1));
        second.wait_turn().await.unwrap();
        assert!(clock.total_slept_ms() >= 1000);
    }

    #[test]
    fn japanese_addresses_prefer_subdivisions() {
        let response = NominatimResponse {
            display_name: Some("long display name".to_string()),
            address: Some(NominatimAddress {
                country: Some("日本".to_string()),
                country_code: Some("jp".to_string()),
                state: Some("東京都".to_string()),
                city: Some("渋谷区".to_string()),
                suburb: Some("神南".to_string()),
                ..Default::default()
            }),
        };
        assert_eq!(
            build_place_name(&response).unwrap(),
            "東京都, 渋谷区, 神南"
        );
    }

    #[test]
    fn other_countries_read_city_state_country() {
        let response = NominatimResponse {
            display_name: None,
            address: Some(NominatimAddress {
                country: Some("France".to_string()),
                country_code: Some("fr".to_string()),
                state: Some("Île-de-France".to_string()),
                town: Some("Versailles".to_string()),
                ..Default::default()
            }),
        };
        assert_eq!(
            build_place_name(&response).unwrap(),
            "Versailles, Île-de-France, France"
        );
    }

    #[test]
    fn empty_address_falls_back_to_truncated_display_name() {
        let long_name = "x".repeat(300);
        let response = NominatimResponse {
            display_name: Some(long_name),
            address: None,
        };
        assert_eq!(build_place_name(&response).unwrap().chars().count(), 100);
    }

    #[test]
    fn nothing_at_all_is_none() {
        let response = NominatimResponse {
            display_name: None,
            address: None,
        };
        assert!(build_place_name(&response).is_none());
    }
}
