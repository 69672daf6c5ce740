//! # AGPS Request Handler
//!
//! The band pulls almanac data by issuing a request like
//! `/agps?constellations=GPS,GLONASS`. The phone answers with the cached
//! archive, byte for byte, or not at all.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      handle(path, query)                                │
//! │                                                                         │
//! │  no `constellations` key ─────────────────────────► None (silent)      │
//! │  request already in flight ───────────────────────► None (silent)      │
//! │  cache file absent / unreadable / over cap ───────► None (silent)      │
//! │  archive fails to parse ──────────► Error status ─► None               │
//! │  first unknown name or missing entry ─► Error ────► None               │
//! │  every constellation present ─────────────────────► AgpsDelivery       │
//! │                                                        │                │
//! │                     transport confirms full transfer   ▼                │
//! │                                                   ticket.confirm()      │
//! │                                   last_update, Current, delete file     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A request either gets the whole archive or nothing. Only one request per
//! device is in flight at a time: the [`DeliveryTicket`] holds the guard
//! until it is confirmed, abandoned or dropped.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use tether_core::{AgpsStatus, Archive, Constellation};
use tether_store::AgpsCache;

use crate::events::{PreferenceEmitter, PreferenceUpdate};

/// Query key carrying the requested constellations.
pub const QUERY_CONSTELLATIONS: &str = "constellations";

// =============================================================================
// Query Parameters
// =============================================================================

/// Decoded query parameters of a pull request. Keys may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    /// Decodes an `application/x-www-form-urlencoded` query string. A leading
    /// `?` is ignored.
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let pairs = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        QueryParams { pairs }
    }

    /// Adds one key/value pair.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((key.into(), value.into()));
        self
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `key`, in order of appearance.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Splits a constellation list on commas.
///
/// Trailing empty segments are dropped. A value without any comma is kept
/// whole, so `""` yields `[""]`, while `",,"` yields nothing at all and
/// `"GPS,,"` yields `["GPS"]`.
pub fn split_constellations(value: &str) -> Vec<&str> {
    if !value.contains(',') {
        return vec![value];
    }
    let mut names: Vec<&str> = value.split(',').collect();
    while names.last().is_some_and(|n| n.is_empty()) {
        names.pop();
    }
    names
}

/// Why a set of requested constellations cannot be served.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Rejection {
    Unknown(String),
    MissingEntry(&'static str),
}

/// Resolves every requested name, failing on the first that is unknown or
/// absent from the archive.
fn resolve(names: &[&str], archive: &Archive) -> Result<Vec<Constellation>, Rejection> {
    names
        .iter()
        .map(|name| {
            let constellation: Constellation = name
                .parse()
                .map_err(|_| Rejection::Unknown(name.to_string()))?;
            if !archive.contains(constellation.file_name()) {
                return Err(Rejection::MissingEntry(constellation.file_name()));
            }
            Ok(constellation)
        })
        .collect()
}

// =============================================================================
// Handler
// =============================================================================

/// Serves AGPS pull requests for one device.
pub struct AgpsRequestHandler {
    device_id: Arc<str>,
    cache: AgpsCache,
    emitter: Arc<dyn PreferenceEmitter>,
    in_flight: Arc<Mutex<()>>,
}

/// Payload for one accepted request plus the means to confirm it.
pub struct AgpsDelivery {
    pub bytes: Vec<u8>,
    pub ticket: DeliveryTicket,
}

impl std::fmt::Debug for AgpsDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgpsDelivery")
            .field("bytes", &self.bytes.len())
            .field("ticket", &self.ticket)
            .finish()
    }
}

impl AgpsRequestHandler {
    pub fn new(
        device_id: impl Into<Arc<str>>,
        cache: AgpsCache,
        emitter: Arc<dyn PreferenceEmitter>,
    ) -> Self {
        AgpsRequestHandler {
            device_id: device_id.into(),
            cache,
            emitter,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn cache(&self) -> &AgpsCache {
        &self.cache
    }

    /// Returns true while a delivered archive awaits confirmation.
    pub fn is_busy(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// Answers one pull request. `None` means the device gets no response.
    pub async fn handle(&self, path: &str, query: &QueryParams) -> Option<AgpsDelivery> {
        if !query.contains_key(QUERY_CONSTELLATIONS) {
            debug!(device_id = %self.device_id, path, "No constellations in request, skipping");
            return None;
        }

        let guard = match self.in_flight.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                warn!(device_id = %self.device_id, path, "AGPS delivery already in flight, ignoring request");
                return None;
            }
        };

        let bytes = match self.cache.read(&self.device_id).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                info!(device_id = %self.device_id, "No cached AGPS data");
                return None;
            }
            Err(e) if e.is_unreadable_content() => {
                warn!(device_id = %self.device_id, error = %e, "Cached AGPS data unusable");
                return None;
            }
            Err(e) => {
                error!(device_id = %self.device_id, error = %e, "Unable to read cached AGPS data");
                return None;
            }
        };

        let archive = match Archive::parse(bytes) {
            Ok(archive) => archive,
            Err(e) => {
                error!(device_id = %self.device_id, error = %e, "Cached AGPS archive is corrupt");
                self.report_error();
                return None;
            }
        };

        let merged: Vec<&str> = query
            .get_all(QUERY_CONSTELLATIONS)
            .flat_map(split_constellations)
            .collect();

        match resolve(&merged, &archive) {
            Ok(constellations) => {
                info!(
                    device_id = %self.device_id,
                    constellations = ?constellations,
                    size = archive.as_bytes().len(),
                    "Sending AGPS data"
                );
                Some(AgpsDelivery {
                    bytes: archive.into_bytes(),
                    ticket: DeliveryTicket {
                        device_id: self.device_id.clone(),
                        cache: self.cache.clone(),
                        emitter: self.emitter.clone(),
                        _guard: guard,
                    },
                })
            }
            Err(Rejection::Unknown(name)) => {
                error!(device_id = %self.device_id, constellation = %name, "Unsupported AGPS constellation requested");
                self.report_error();
                None
            }
            Err(Rejection::MissingEntry(file)) => {
                error!(device_id = %self.device_id, file, "AGPS archive is missing requested file");
                self.report_error();
                None
            }
        }
    }

    fn report_error(&self) {
        self.emitter
            .emit(PreferenceUpdate::agps_status(&*self.device_id, AgpsStatus::Error));
    }
}

// =============================================================================
// Delivery Ticket
// =============================================================================

/// One-shot continuation for a delivered archive.
///
/// Consumed by [`confirm`](Self::confirm) or [`abandon`](Self::abandon), so
/// a delivery can be confirmed at most once. Dropping it is the same as
/// abandoning it.
pub struct DeliveryTicket {
    device_id: Arc<str>,
    cache: AgpsCache,
    emitter: Arc<dyn PreferenceEmitter>,
    _guard: OwnedMutexGuard<()>,
}

impl std::fmt::Debug for DeliveryTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryTicket")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

impl DeliveryTicket {
    /// The transport confirmed the bytes reached the device.
    ///
    /// Pushes the update time and `Current`, then deletes the cached file.
    /// A failed delete is only logged.
    pub async fn confirm(self) {
        info!(device_id = %self.device_id, "AGPS data delivered");

        self.emitter
            .emit(PreferenceUpdate::agps_last_update(&*self.device_id, Utc::now()));
        self.emitter
            .emit(PreferenceUpdate::agps_status(&*self.device_id, AgpsStatus::Current));

        match self.cache.remove(&self.device_id).await {
            Ok(true) => info!(device_id = %self.device_id, "Cached AGPS data deleted"),
            Ok(false) => debug!(device_id = %self.device_id, "Cached AGPS data already gone"),
            Err(e) => warn!(device_id = %self.device_id, error = %e, "Failed to delete cached AGPS data"),
        }
    }

    /// The transfer did not complete; the cache file stays for next time.
    pub fn abandon(self) {
        debug!(device_id = %self.device_id, "AGPS delivery abandoned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEmitter;
    use tempfile::TempDir;
    use tether_core::PREF_AGPS_LAST_UPDATE;

    const DEVICE: &str = "C3:1A:00:00:12:34";

    fn tar_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_ustar();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    struct Fixture {
        _dir: TempDir,
        cache: AgpsCache,
        emitter: Arc<RecordingEmitter>,
        handler: AgpsRequestHandler,
    }

    async fn fixture(archive: Option<Vec<u8>>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let cache = AgpsCache::new(dir.path());
        if let Some(bytes) = archive {
            cache.write(DEVICE, &bytes).await.unwrap();
        }
        let emitter = Arc::new(RecordingEmitter::default());
        let handler = AgpsRequestHandler::new(DEVICE, cache.clone(), emitter.clone());
        Fixture {
            _dir: dir,
            cache,
            emitter,
            handler,
        }
    }

    fn gps_glonass() -> Vec<u8> {
        tar_of(&[
            ("CPE_GPS.BIN", b"gps almanac".as_slice()),
            ("CPE_GLO.BIN", b"glonass almanac".as_slice()),
        ])
    }

    #[test]
    fn test_query_parsing_keeps_repeats() {
        let query = QueryParams::parse("?constellations=GPS%2CGLONASS&constellations=QZSS&x=1");
        assert!(query.contains_key("constellations"));
        assert_eq!(
            query.get_all("constellations").collect::<Vec<_>>(),
            vec!["GPS,GLONASS", "QZSS"]
        );
        assert_eq!(query.get("constellations"), Some("GPS,GLONASS"));
        assert_eq!(query.get("x"), Some("1"));
        assert_eq!(query.get("y"), None);
        assert!(QueryParams::parse("").is_empty());
    }

    #[test]
    fn test_split_drops_trailing_empties_only() {
        assert_eq!(split_constellations("GPS,GLONASS"), vec!["GPS", "GLONASS"]);
        assert_eq!(split_constellations("GPS,,"), vec!["GPS"]);
        assert_eq!(split_constellations("GPS,,QZSS"), vec!["GPS", "", "QZSS"]);
        assert_eq!(split_constellations(""), vec![""]);
        assert!(split_constellations(",,").is_empty());
        assert_eq!(split_constellations(",GPS"), vec!["", "GPS"]);
    }

    #[tokio::test]
    async fn test_all_present_returns_archive_unchanged() {
        let archive = gps_glonass();
        let fx = fixture(Some(archive.clone())).await;

        let query = QueryParams::parse("constellations=GPS,GLONASS");
        let delivery = fx.handler.handle("/agps", &query).await.unwrap();

        assert_eq!(delivery.bytes, archive);
        assert!(fx.emitter.updates().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_constellation_reports_error_once() {
        let fx = fixture(Some(gps_glonass())).await;

        let query = QueryParams::parse("constellations=GPS,BEIDOU,NAVIC");
        assert!(fx.handler.handle("/agps", &query).await.is_none());

        assert_eq!(fx.emitter.statuses(), vec![AgpsStatus::Error]);
        assert_eq!(fx.emitter.updates().len(), 1);
        assert!(fx.cache.exists(DEVICE).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_entry_reports_error_once() {
        let fx = fixture(Some(gps_glonass())).await;

        let query = QueryParams::parse("constellations=GPS,GALILEO");
        assert!(fx.handler.handle("/agps", &query).await.is_none());
        assert_eq!(fx.emitter.statuses(), vec![AgpsStatus::Error]);
    }

    #[tokio::test]
    async fn test_names_are_case_sensitive() {
        let fx = fixture(Some(gps_glonass())).await;

        let query = QueryParams::parse("constellations=gps");
        assert!(fx.handler.handle("/agps", &query).await.is_none());
        assert_eq!(fx.emitter.statuses(), vec![AgpsStatus::Error]);
    }

    #[tokio::test]
    async fn test_missing_key_is_silent() {
        let fx = fixture(Some(gps_glonass())).await;

        let query = QueryParams::parse("constellation=GPS");
        assert!(fx.handler.handle("/agps", &query).await.is_none());
        assert!(fx.emitter.updates().is_empty());
    }

    #[tokio::test]
    async fn test_missing_or_oversized_file_is_silent() {
        let fx = fixture(None).await;
        let query = QueryParams::parse("constellations=GPS");
        assert!(fx.handler.handle("/agps", &query).await.is_none());

        fx.cache.write(DEVICE, &gps_glonass()).await.unwrap();
        let small = AgpsRequestHandler::new(
            DEVICE,
            fx.cache.clone().with_max_bytes(512),
            fx.emitter.clone(),
        );
        assert!(small.handle("/agps", &query).await.is_none());

        assert!(fx.emitter.updates().is_empty());
    }

    #[tokio::test]
    async fn test_archive_at_size_cap_is_delivered() {
        // 512-byte header plus 2045 data blocks plus the two end blocks.
        let archive = tar_of(&[("CPE_GPS.BIN", vec![0x5a; 2045 * 512].as_slice())]);
        assert_eq!(archive.len() as u64, tether_core::MAX_ARCHIVE_BYTES);
        let fx = fixture(Some(archive.clone())).await;

        let query = QueryParams::parse("constellations=GPS");
        let delivery = fx.handler.handle("/agps", &query).await.unwrap();

        assert_eq!(delivery.bytes, archive);
        assert!(fx.emitter.updates().is_empty());
    }

    #[tokio::test]
    async fn test_archive_one_byte_over_cap_is_silent() {
        let mut archive = tar_of(&[("CPE_GPS.BIN", vec![0x5a; 2045 * 512].as_slice())]);
        archive.push(0);
        assert_eq!(archive.len() as u64, tether_core::MAX_ARCHIVE_BYTES + 1);
        let fx = fixture(Some(archive)).await;

        let query = QueryParams::parse("constellations=GPS");
        assert!(fx.handler.handle("/agps", &query).await.is_none());

        assert!(fx.emitter.updates().is_empty());
        assert!(fx.cache.exists(DEVICE).await.unwrap());
    }

    #[tokio::test]
    async fn test_only_commas_sends_whole_archive() {
        let archive = gps_glonass();
        let fx = fixture(Some(archive.clone())).await;

        let query = QueryParams::parse("constellations=,,");
        let delivery = fx.handler.handle("/agps", &query).await.unwrap();

        assert_eq!(delivery.bytes, archive);
        assert!(fx.emitter.updates().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_archive_reports_error() {
        let fx = fixture(Some(vec![0x41; 700])).await;

        let query = QueryParams::parse("constellations=GPS");
        assert!(fx.handler.handle("/agps", &query).await.is_none());
        assert_eq!(fx.emitter.statuses(), vec![AgpsStatus::Error]);
    }

    #[tokio::test]
    async fn test_repeated_keys_are_merged() {
        let fx = fixture(Some(gps_glonass())).await;

        let ok = QueryParams::parse("constellations=GPS&constellations=GLONASS");
        assert!(fx.handler.handle("/agps", &ok).await.is_some());

        let bad = QueryParams::parse("constellations=GPS&constellations=QZSS");
        assert!(fx.handler.handle("/agps", &bad).await.is_none());
        assert_eq!(fx.emitter.statuses(), vec![AgpsStatus::Error]);
    }

    #[tokio::test]
    async fn test_confirm_pushes_status_and_deletes_cache() {
        let fx = fixture(Some(gps_glonass())).await;
        let before = Utc::now().timestamp_millis();

        let query = QueryParams::parse("constellations=GPS");
        let delivery = fx.handler.handle("/agps", &query).await.unwrap();
        delivery.ticket.confirm().await;

        let updates = fx.emitter.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].key, PREF_AGPS_LAST_UPDATE);
        let stamped = updates[0].value.as_i64().unwrap();
        assert!(stamped >= before);
        assert_eq!(fx.emitter.statuses(), vec![AgpsStatus::Current]);

        assert!(!fx.cache.exists(DEVICE).await.unwrap());

        // Nothing left to send, and no extra status events.
        assert!(fx.handler.handle("/agps", &query).await.is_none());
        assert_eq!(fx.emitter.updates().len(), 2);
    }

    #[tokio::test]
    async fn test_one_request_in_flight() {
        let fx = fixture(Some(gps_glonass())).await;
        let query = QueryParams::parse("constellations=GPS");

        let first = fx.handler.handle("/agps", &query).await.unwrap();
        assert!(fx.handler.is_busy());
        assert!(fx.handler.handle("/agps", &query).await.is_none());

        first.ticket.abandon();
        assert!(!fx.handler.is_busy());

        // The file survives an abandoned transfer.
        let second = fx.handler.handle("/agps", &query).await.unwrap();
        drop(second);
        assert!(fx.handler.handle("/agps", &query).await.is_some());
        assert!(fx.emitter.updates().is_empty());
    }
}
