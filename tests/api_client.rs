use chain_player::player::{
    api_client::{parse_chain, parse_config, parse_segments, FetchApiClient},
    segment::SegmentState,
    PlayerErrorCode,
};
use url::Url;

const SEGMENTS: &str = r#"{
  "data": [
    {
      "id": "1002",
      "type": "segments",
      "attributes": {
        "offset": 2,
        "state": "dubbed",
        "beginAt": "2017-02-14 12:03:16.000000Z",
        "endAt": "2017-02-14 12:03:24.000000Z",
        "waveformKey": "chains-1-segments-1002.ogg"
      }
    },
    {
      "id": 1001,
      "type": "segments",
      "attributes": {
        "offset": 1,
        "state": "dubbed",
        "beginAt": "2017-02-14T12:03:08.000Z",
        "endAt": "2017-02-14T12:03:16.000Z",
        "waveformKey": "chains-1-segments-1001.ogg"
      }
    },
    {
      "id": "1003",
      "type": "segments",
      "attributes": {
        "offset": 3,
        "state": "dubbing",
        "beginAt": "2017-02-14T12:03:24.000Z",
        "endAt": "2017-02-14T12:03:24.000Z",
        "waveformKey": "chains-1-segments-1003.ogg"
      }
    },
    {
      "id": "1004",
      "type": "segments",
      "attributes": {
        "offset": 4,
        "beginAt": "2017-02-14T12:03:32.000Z",
        "endAt": "2017-02-14T12:03:40.000Z"
      }
    },
    {
      "id": "1005",
      "type": "segments",
      "attributes": {
        "offset": 5,
        "beginAt": "later",
        "endAt": "2017-02-14T12:03:48.000Z",
        "waveformKey": "chains-1-segments-1005.ogg"
      }
    }
  ]
}"#;

#[test]
fn test_parse_segments_drops_malformed_records() {
    let result = parse_segments(SEGMENTS.as_bytes());
    assert!(result.is_ok());

    let segments = result.unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].id, "1001");
    assert_eq!(segments[0].offset, 1);
    assert_eq!(segments[0].begin_at_millis, 1_487_073_788_000);
    assert_eq!(segments[0].duration_millis(), 8_000);
    assert_eq!(segments[0].state, SegmentState::Dubbed);
    assert_eq!(segments[1].id, "1002");
    assert_eq!(segments[1].waveform_key, "chains-1-segments-1002.ogg");
}

#[test]
fn test_parse_segments_rejects_non_json() {
    let result = parse_segments(b"<html>502 Bad Gateway</html>");
    assert_eq!(result.unwrap_err().code, PlayerErrorCode::Payload);
}

#[test]
fn test_parse_empty_segment_list() {
    let segments = parse_segments(br#"{"data":[]}"#).unwrap();
    assert!(segments.is_empty());
}

#[test]
fn test_parse_chain() {
    let chain = parse_chain(
        br#"{"data":{"id":"7","type":"chains","attributes":{"name":"Cool Air","embedKey":"coolair","state":"fabricate"}}}"#,
    )
    .unwrap();
    assert_eq!(chain.id, "7");
    assert_eq!(chain.name, "Cool Air");
    assert_eq!(chain.embed_key.as_deref(), Some("coolair"));
    assert_eq!(chain.state.as_deref(), Some("fabricate"));
}

#[test]
fn test_parse_chain_without_name_uses_id() {
    let chain = parse_chain(br#"{"data":[{"id":"7","type":"chains","attributes":{}}]}"#).unwrap();
    assert_eq!(chain.name, "7");
    assert!(chain.embed_key.is_none());
}

#[test]
fn test_parse_config_normalises_base_url() {
    let config = parse_config(br#"{"config":{"segmentBaseUrl":"https://audio.example.com/chains"}}"#)
        .unwrap();
    assert_eq!(
        config.segment_base_url.as_str(),
        "https://audio.example.com/chains/"
    );

    let flat = parse_config(br#"{"segmentBaseUrl":"https://audio.example.com/"}"#).unwrap();
    assert_eq!(flat.segment_base_url.as_str(), "https://audio.example.com/");
}

#[test]
fn test_parse_config_requires_base_url() {
    let result = parse_config(br#"{"config":{"appName":"radio"}}"#);
    assert_eq!(result.unwrap_err().code, PlayerErrorCode::Config);
    let result = parse_config(br#"{"config":{"segmentBaseUrl":"not a url"}}"#);
    assert_eq!(result.unwrap_err().code, PlayerErrorCode::Config);
}

#[test]
fn test_endpoint_urls() {
    let client = FetchApiClient::new(Url::parse("https://radio.example.com").unwrap()).unwrap();
    assert_eq!(
        client.config_url().unwrap().as_str(),
        "https://radio.example.com/api/1/config"
    );
    assert_eq!(
        client.chain_url("coolair").unwrap().as_str(),
        "https://radio.example.com/api/1/chains/coolair"
    );
    assert_eq!(
        client.segments_url("coolair").unwrap().as_str(),
        "https://radio.example.com/api/1/segments?chainId=coolair"
    );

    let nested = FetchApiClient::new(Url::parse("https://example.com/radio").unwrap()).unwrap();
    assert_eq!(nested.base_url().as_str(), "https://example.com/radio/");
    assert_eq!(
        nested.chain_url("a b").unwrap().as_str(),
        "https://example.com/radio/api/1/chains/a%20b"
    );
}
