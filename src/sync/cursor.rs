use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};

/// Opaque sync position held by clients.
///
/// The wire format is base64 over `v1:<unix-millis>`. Clients must treat
/// the token as opaque; only this type encodes or decodes it. An absent or
/// unreadable token decodes to the epoch, which turns the next request
/// into a full resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCursor {
    watermark: DateTime<Utc>,
}

impl SyncCursor {
    pub fn epoch() -> Self {
        Self {
            watermark: DateTime::UNIX_EPOCH,
        }
    }

    pub fn at(watermark: DateTime<Utc>) -> Self {
        Self { watermark }
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark
    }

    pub fn encode(&self) -> String {
        let payload = format!("v1:{}", self.watermark.timestamp_millis());
        URL_SAFE_NO_PAD.encode(payload)
    }

    pub fn decode(token: Option<&str>) -> Self {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Self::epoch();
        };

        URL_SAFE_NO_PAD
            .decode(token)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|payload| {
                payload
                    .strip_prefix("v1:")?
                    .parse::<i64>()
                    .ok()
                    .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            })
            .map(Self::at)
            .unwrap_or_else(Self::epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_watermark_to_millis() {
        let now = Utc::now();
        let cursor = SyncCursor::at(now);
        let decoded = SyncCursor::decode(Some(&cursor.encode()));
        assert_eq!(
            decoded.watermark().timestamp_millis(),
            now.timestamp_millis()
        );
    }

    #[test]
    fn absent_cursor_means_full_resync() {
        assert_eq!(SyncCursor::decode(None), SyncCursor::epoch());
        assert_eq!(SyncCursor::decode(Some("")), SyncCursor::epoch());
    }

    #[test]
    fn garbage_cursor_means_full_resync() {
        for garbage in ["!!not-base64!!", "djI6MTIz", "dGV4dA"] {
            assert_eq!(SyncCursor::decode(Some(garbage)), SyncCursor::epoch());
        }
    }

    #[test]
    fn epoch_watermark_predates_everything() {
        assert!(SyncCursor::epoch().watermark() < Utc::now());
    }
}
