use futures::future::{FutureExt, LocalBoxFuture};
use log::warn;
use url::Url;

use super::{
    jsonapi::{parse_flat_object, Payload},
    net_task::{fetch_net_task, NetTask},
    segment::{
        directory_url, Chain, ChainRecord, PlatformConfig, PlatformConfigRecord, Segment,
        SegmentRecord,
    },
    PlayerError, PlayerErrorCode,
};

/// Everything the engine needs from the platform backend.
pub trait ChainApi {
    fn config(&self) -> LocalBoxFuture<'static, Result<PlatformConfig, PlayerError>>;

    fn chain(&self, chain_id: &str) -> LocalBoxFuture<'static, Result<Chain, PlayerError>>;

    /// The currently active segments of a chain. Malformed records are
    /// dropped, never returned.
    fn segments(&self, chain_id: &str) -> LocalBoxFuture<'static, Result<Vec<Segment>, PlayerError>>;

    /// Raw encoded audio for one segment.
    fn waveform(&self, url: &Url) -> LocalBoxFuture<'static, Result<Vec<u8>, PlayerError>>;
}

pub fn parse_config(body: &[u8]) -> Result<PlatformConfig, PlayerError> {
    let flat = parse_flat_object(body, "config")?;
    let record: PlatformConfigRecord = serde_json::from_value(serde_json::Value::Object(flat))
        .map_err(|err| PlayerError::new_code(PlayerErrorCode::Payload, err.to_string()))?;
    PlatformConfig::try_from(record)
}

pub fn parse_chain(body: &[u8]) -> Result<Chain, PlayerError> {
    let record: ChainRecord = Payload::parse(body)?.one()?.into_record()?;
    Ok(Chain::from(record))
}

pub fn parse_segments(body: &[u8]) -> Result<Vec<Segment>, PlayerError> {
    let mut segments = Vec::new();
    for resource in Payload::parse(body)?.many() {
        let segment = resource
            .into_record::<SegmentRecord>()
            .and_then(Segment::try_from);
        match segment {
            Ok(segment) => segments.push(segment),
            Err(err) => warn!("skipping malformed segment: {}", err),
        }
    }
    segments.sort_by_key(|segment| (segment.begin_at_millis, segment.offset));
    Ok(segments)
}

/// JSON:API client over `window.fetch`.
#[derive(Clone)]
pub struct FetchApiClient {
    base_url: Url,
}

impl FetchApiClient {
    pub fn new(base_url: Url) -> Result<FetchApiClient, PlayerError> {
        Ok(FetchApiClient {
            base_url: directory_url(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn config_url(&self) -> Result<Url, PlayerError> {
        self.endpoint(&["api", "1", "config"])
    }

    pub fn chain_url(&self, chain_id: &str) -> Result<Url, PlayerError> {
        self.endpoint(&["api", "1", "chains", chain_id])
    }

    pub fn segments_url(&self, chain_id: &str) -> Result<Url, PlayerError> {
        let mut url = self.endpoint(&["api", "1", "segments"])?;
        url.query_pairs_mut().append_pair("chainId", chain_id);
        Ok(url)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, PlayerError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                PlayerError::new_code(
                    PlayerErrorCode::InvalidUrl,
                    format!("{} cannot be a base", self.base_url),
                )
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get<T, F>(url: Result<Url, PlayerError>, parse: F) -> LocalBoxFuture<'static, Result<T, PlayerError>>
    where
        T: 'static,
        F: FnOnce(&[u8]) -> Result<T, PlayerError> + 'static,
    {
        async move {
            let body = fetch_net_task(&NetTask::json(url?)).await?;
            parse(&body)
        }
        .boxed_local()
    }
}

impl ChainApi for FetchApiClient {
    fn config(&self) -> LocalBoxFuture<'static, Result<PlatformConfig, PlayerError>> {
        Self::get(self.config_url(), parse_config)
    }

    fn chain(&self, chain_id: &str) -> LocalBoxFuture<'static, Result<Chain, PlayerError>> {
        Self::get(self.chain_url(chain_id), parse_chain)
    }

    fn segments(&self, chain_id: &str) -> LocalBoxFuture<'static, Result<Vec<Segment>, PlayerError>> {
        Self::get(self.segments_url(chain_id), parse_segments)
    }

    fn waveform(&self, url: &Url) -> LocalBoxFuture<'static, Result<Vec<u8>, PlayerError>> {
        let task = NetTask::binary(url.clone());
        async move { fetch_net_task(&task).await }.boxed_local()
    }
}
