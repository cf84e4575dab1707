use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;
use url::Url;

use super::{PlayerError, PlayerErrorCode};

/// A stream the engine can be bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub id: String,
    pub embed_key: Option<String>,
    pub name: String,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Planned,
    Crafting,
    Crafted,
    Dubbing,
    Dubbed,
    Failed,
    Unknown,
}

impl SegmentState {
    pub fn parse(value: &str) -> SegmentState {
        match value.to_ascii_lowercase().as_str() {
            "planned" => SegmentState::Planned,
            "crafting" => SegmentState::Crafting,
            "crafted" => SegmentState::Crafted,
            "dubbing" => SegmentState::Dubbing,
            "dubbed" => SegmentState::Dubbed,
            "failed" => SegmentState::Failed,
            _ => SegmentState::Unknown,
        }
    }
}

/// One pre-rendered slice of a chain, validated at the API boundary.
///
/// `begin_at_millis < end_at_millis` always holds for a constructed segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub id: String,
    pub offset: i64,
    pub state: SegmentState,
    pub begin_at_millis: i64,
    pub end_at_millis: i64,
    pub waveform_key: String,
}

impl Segment {
    pub fn new(
        id: &str,
        offset: i64,
        begin_at_millis: i64,
        end_at_millis: i64,
        waveform_key: &str,
    ) -> Result<Segment, PlayerError> {
        if id.is_empty() {
            return Err(PlayerError::new_code(
                PlayerErrorCode::InvalidSegment,
                "segment has no id".to_string(),
            ));
        }
        if begin_at_millis >= end_at_millis {
            return Err(PlayerError::new_code(
                PlayerErrorCode::InvalidSegment,
                format!(
                    "segment {} ends before it begins ({} >= {})",
                    id, begin_at_millis, end_at_millis
                ),
            ));
        }
        if waveform_key.trim().is_empty() {
            return Err(PlayerError::new_code(
                PlayerErrorCode::InvalidSegment,
                format!("segment {} has no waveform key", id),
            ));
        }
        Ok(Segment {
            id: id.to_owned(),
            offset,
            state: SegmentState::Dubbed,
            begin_at_millis,
            end_at_millis,
            waveform_key: waveform_key.to_owned(),
        })
    }

    pub fn with_state(mut self, state: SegmentState) -> Segment {
        self.state = state;
        self
    }

    pub fn duration_millis(&self) -> i64 {
        self.end_at_millis - self.begin_at_millis
    }
}

/// Flattened `data.attributes` of a segment resource, before validation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRecord {
    pub id: String,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub begin_at: Option<String>,
    #[serde(default)]
    pub end_at: Option<String>,
    #[serde(default)]
    pub waveform_key: Option<String>,
}

impl TryFrom<SegmentRecord> for Segment {
    type Error = PlayerError;

    fn try_from(record: SegmentRecord) -> Result<Segment, PlayerError> {
        let missing = |field: &str| {
            PlayerError::new_code(
                PlayerErrorCode::InvalidSegment,
                format!("segment {} is missing {}", record.id, field),
            )
        };
        let begin_at = record.begin_at.as_deref().ok_or_else(|| missing("beginAt"))?;
        let end_at = record.end_at.as_deref().ok_or_else(|| missing("endAt"))?;
        let waveform_key = record
            .waveform_key
            .as_deref()
            .ok_or_else(|| missing("waveformKey"))?;

        let segment = Segment::new(
            &record.id,
            record.offset.unwrap_or_default(),
            parse_utc_millis(begin_at)?,
            parse_utc_millis(end_at)?,
            waveform_key,
        )?;
        Ok(segment.with_state(
            record
                .state
                .as_deref()
                .map_or(SegmentState::Unknown, SegmentState::parse),
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub embed_key: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

impl From<ChainRecord> for Chain {
    fn from(record: ChainRecord) -> Chain {
        Chain {
            name: record.name.unwrap_or_else(|| record.id.clone()),
            id: record.id,
            embed_key: record.embed_key.filter(|key| !key.is_empty()),
            state: record.state,
        }
    }
}

/// Platform configuration served by the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    pub segment_base_url: Url,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfigRecord {
    #[serde(default)]
    pub segment_base_url: Option<String>,
}

impl TryFrom<PlatformConfigRecord> for PlatformConfig {
    type Error = PlayerError;

    fn try_from(record: PlatformConfigRecord) -> Result<PlatformConfig, PlayerError> {
        let raw = record.segment_base_url.ok_or_else(|| {
            PlayerError::new_code(
                PlayerErrorCode::Config,
                "platform config has no segmentBaseUrl".to_string(),
            )
        })?;
        let url = Url::parse(&raw).map_err(|err| {
            PlayerError::new_code(
                PlayerErrorCode::Config,
                format!("invalid segmentBaseUrl {}: {}", raw, err),
            )
        })?;
        Ok(PlatformConfig {
            segment_base_url: directory_url(url)?,
        })
    }
}

/// Ensures the URL path ends with a slash so joined keys land beneath it.
pub fn directory_url(mut url: Url) -> Result<Url, PlayerError> {
    if url.cannot_be_a_base() {
        return Err(PlayerError::new_code(
            PlayerErrorCode::InvalidUrl,
            format!("{} cannot be a base url", url),
        ));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Resolves a waveform key beneath the segment base URL.
///
/// Keys that would escape the base (absolute URLs, other hosts) are rejected.
pub fn waveform_url(base_url: &Url, waveform_key: &str) -> Result<Url, PlayerError> {
    let invalid = |reason: String| PlayerError::new_code(PlayerErrorCode::InvalidUrl, reason);
    let key = waveform_key.trim();
    if key.is_empty() {
        return Err(invalid("empty waveform key".to_string()));
    }
    let url = base_url
        .join(key)
        .map_err(|err| invalid(format!("cannot join {} onto {}: {}", key, base_url, err)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme in {}", url)));
    }
    if url.host_str() != base_url.host_str() || !url.path().starts_with(base_url.path()) {
        return Err(invalid(format!("{} escapes {}", url, base_url)));
    }
    Ok(url)
}

/// Parses a UTC timestamp as served by the API into epoch milliseconds.
///
/// Accepts RFC 3339 as well as the space-separated `2017-02-14 12:03:08.000001Z`
/// form.
pub fn parse_utc_millis(value: &str) -> Result<i64, PlayerError> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.timestamp_millis());
    }
    let naive = value.trim_end_matches('Z');
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(naive, format) {
            return Ok(parsed.and_utc().timestamp_millis());
        }
    }
    Err(PlayerError::new_code(
        PlayerErrorCode::InvalidSegment,
        format!("unparseable timestamp {:?}", value),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_timestamp_forms() {
        let rfc = parse_utc_millis("2017-02-14T12:03:08.5Z").unwrap();
        let spaced = parse_utc_millis("2017-02-14 12:03:08.500000Z").unwrap();
        assert_eq!(rfc, 1487073788500);
        assert_eq!(rfc, spaced);
        assert!(parse_utc_millis("yesterday").is_err());
    }

    #[test]
    fn rejects_inverted_windows() {
        assert!(Segment::new("1", 0, 5000, 5000, "a.ogg").is_err());
        assert!(Segment::new("1", 0, 6000, 5000, "a.ogg").is_err());
        assert!(Segment::new("1", 0, 5000, 6000, " ").is_err());
        assert!(Segment::new("1", 0, 5000, 6000, "a.ogg").is_ok());
    }

    #[test]
    fn waveform_urls_stay_beneath_base() {
        let base = directory_url(Url::parse("https://audio.example.com/chains").unwrap()).unwrap();
        assert_eq!(base.as_str(), "https://audio.example.com/chains/");
        assert_eq!(
            waveform_url(&base, "abc-123.ogg").unwrap().as_str(),
            "https://audio.example.com/chains/abc-123.ogg"
        );
        assert!(waveform_url(&base, "").is_err());
        assert!(waveform_url(&base, "https://elsewhere.example.com/x.ogg").is_err());
        assert!(waveform_url(&base, "../secret.ogg").is_err());
    }

    #[test]
    fn directory_slash_lands_on_the_path() {
        let base =
            directory_url(Url::parse("https://audio.example.com/chains?v=2#top").unwrap()).unwrap();
        assert_eq!(base.as_str(), "https://audio.example.com/chains/?v=2#top");
        assert_eq!(
            waveform_url(&base, "abc-123.ogg").unwrap().as_str(),
            "https://audio.example.com/chains/abc-123.ogg"
        );
        assert!(directory_url(Url::parse("mailto:radio@example.com").unwrap()).is_err());
    }
}
