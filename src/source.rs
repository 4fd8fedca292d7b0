//! Raw channel listings from playlist files and channel APIs.
//!
//! API responses come in several shapes; every entry goes through
//! [`adapt_record`], which looks up each field from an ordered list of
//! candidate names and refuses values it cannot read as text.

use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::channels::RawChannelRecord;

const NAME_FIELDS: &[&str] = &["name", "title"];
const CATEGORY_FIELDS: &[&str] = &["category", "group"];
const LOGO_FIELDS: &[&str] = &["logo", "image", "poster"];
const STREAM_FIELDS: &[&str] = &["stream", "streamUrl", "embed_url", "url"];

/// Category given to envelope entries that carry none.
const CHANNEL_CATEGORY: &str = "TV";
const EVENT_CATEGORY: &str = "Evento";

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Unparseable entry: {0}")]
    Unparseable(String),

    #[error("API rejected the request")]
    Rejected,

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where raw listings come from.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    #[serde(default, deserialize_with = "crate::deserialize_one_or_many")]
    pub files: Vec<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    /// Stream URL used for API entries that only carry an id, e.g. `https://host/embed?id={id}`.
    #[serde(default)]
    pub fallback_stream_template: Option<String>,
    #[serde(default)]
    pub watch: bool,
}

fn text_field(object: &serde_json::Map<String, Value>, candidates: &[&str]) -> Result<Option<String>, SourceError> {
    for field in candidates {
        match object.get(*field) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) if s.trim().is_empty() => continue,
            Some(Value::String(s)) => return Ok(Some(s.clone())),
            Some(other) => {
                return Err(SourceError::Unparseable(format!(
                    "field `{field}` is not a string: {other}"
                )))
            }
        }
    }
    Ok(None)
}

fn id_text(object: &serde_json::Map<String, Value>) -> Option<String> {
    match object.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Turns one JSON entry into a typed record.
///
/// Missing names or streams are not errors here; the normalizer drops those.
pub fn adapt_record(value: &Value, fallback_template: Option<&str>) -> Result<RawChannelRecord, SourceError> {
    let Value::Object(object) = value else {
        return Err(SourceError::Unparseable(format!("expected an object, got {value}")));
    };

    let mut stream = text_field(object, STREAM_FIELDS)?;
    if stream.is_none() {
        // Event listings nest their players: {"embeds": [{"embed_url": ...}]}
        let embed = object
            .get("embeds")
            .and_then(Value::as_array)
            .and_then(|e| e.first())
            .and_then(Value::as_object);
        if let Some(embed) = embed {
            stream = text_field(embed, &["embed_url", "url"])?;
        }
    }
    if stream.is_none() {
        if let (Some(template), Some(id)) = (fallback_template, id_text(object)) {
            stream = Some(template.replace("{id}", &id));
        }
    }

    Ok(RawChannelRecord {
        name: text_field(object, NAME_FIELDS)?,
        category: text_field(object, CATEGORY_FIELDS)?,
        logo: text_field(object, LOGO_FIELDS)?,
        stream,
    })
}

fn adapt_all(
    entries: &[Value],
    fallback_template: Option<&str>,
    default_category: Option<&str>,
    out: &mut Vec<RawChannelRecord>,
) {
    for entry in entries {
        match adapt_record(entry, fallback_template) {
            Ok(mut record) => {
                if record.category.is_none() {
                    record.category = default_category.map(str::to_string);
                }
                out.push(record)
            }
            Err(e) => debug!("Skipping API entry: {}", e),
        }
    }
}

/// Parses a channel API response.
///
/// Accepts a bare array, or `{"success": .., "data": ..}` where `data` is
/// an array or an object holding `channels` and `events` arrays.
/// Enveloped channels without a category land in `TV`, events in `Evento`.
pub fn parse_api_response(body: &str, fallback_template: Option<&str>) -> Result<Vec<RawChannelRecord>, SourceError> {
    let value: Value = serde_json::from_str(body)?;
    let mut records = Vec::new();

    match &value {
        Value::Array(entries) => adapt_all(entries, fallback_template, None, &mut records),
        Value::Object(envelope) => {
            if envelope.get("success").and_then(Value::as_bool) == Some(false) {
                return Err(SourceError::Rejected);
            }
            match envelope.get("data") {
                Some(Value::Array(entries)) => {
                    adapt_all(entries, fallback_template, Some(CHANNEL_CATEGORY), &mut records)
                }
                Some(Value::Object(data)) => {
                    for (key, category) in [("channels", CHANNEL_CATEGORY), ("events", EVENT_CATEGORY)] {
                        if let Some(entries) = data.get(key).and_then(Value::as_array) {
                            adapt_all(entries, fallback_template, Some(category), &mut records);
                        }
                    }
                }
                Some(Value::Null) | None => {}
                Some(other) => {
                    return Err(SourceError::Unparseable(format!("unexpected `data`: {other}")));
                }
            }
        }
        other => return Err(SourceError::Unparseable(format!("unexpected response: {other}"))),
    }

    Ok(records)
}

lazy_static! {
    // Attributes run up to the first comma outside double quotes; the title may hold commas.
    static ref EXTINF: Regex =
        Regex::new(r#"^#EXTINF:\s*-?\d+(?:\.\d+)?((?:[^,"]|"[^"]*")*),(.*)$"#).unwrap();
}

fn attribute(attrs: &str, key: &str) -> Option<String> {
    let pattern = format!("{key}=\"");
    let start = attrs.find(&pattern)? + pattern.len();
    let end = attrs[start..].find('"')?;
    Some(attrs[start..start + end].to_string()).filter(|v| !v.is_empty())
}

/// Parses an extended M3U playlist.
pub fn parse_m3u(content: &str) -> Vec<RawChannelRecord> {
    let mut records = Vec::new();
    let mut current: Option<RawChannelRecord> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = EXTINF.captures(line) {
            let attrs = &caps[1];
            current = Some(RawChannelRecord {
                name: Some(caps[2].trim().to_string()),
                category: attribute(attrs, "group-title"),
                logo: attribute(attrs, "tvg-logo"),
                stream: None,
            });
        } else if line.starts_with('#') {
            continue;
        } else if let Some(mut record) = current.take() {
            record.stream = Some(line.to_string());
            records.push(record);
        }
    }

    records
}

fn parse_listing(content: &str, fallback_template: Option<&str>) -> anyhow::Result<Vec<RawChannelRecord>> {
    if content.trim_start().starts_with("#EXTM3U") {
        Ok(parse_m3u(content))
    } else {
        Ok(parse_api_response(content, fallback_template)?)
    }
}

/// Reads a bundled listing, M3U or JSON depending on its content.
pub async fn load_file(path: &Path, fallback_template: Option<&str>) -> anyhow::Result<Vec<RawChannelRecord>> {
    let content = tokio::fs::read_to_string(path).await?;
    let records = parse_listing(&content, fallback_template)?;
    info!("Loaded {} raw records from {}", records.len(), path.display());
    Ok(records)
}

/// Fetches `{api}/channels`, or `{api}/search?q=..` when a search query is set.
pub async fn fetch_records(
    client: &reqwest::Client,
    api_url: &str,
    search: Option<&str>,
    fallback_template: Option<&str>,
) -> anyhow::Result<Vec<RawChannelRecord>> {
    let base = api_url.trim_end_matches('/');
    let request = match search.map(str::trim).filter(|q| !q.is_empty()) {
        Some(query) => client.get(format!("{base}/search")).query(&[("q", query)]),
        None => client.get(format!("{base}/channels")),
    };

    let resp = request.send().await?;
    let status = resp.status();
    if !status.is_success() {
        warn!("Channel API answered {} for {}", status, base);
        anyhow::bail!("channel API returned HTTP {status}");
    }
    let text = resp.text().await?;
    let records = parse_listing(&text, fallback_template)?;
    info!("Fetched {} raw records from {}", records.len(), base);
    Ok(records)
}

/// Loads every configured file and the API, skipping sources that fail.
pub async fn load_all(config: &SourcesConfig, client: &reqwest::Client) -> Vec<RawChannelRecord> {
    let template = config.fallback_stream_template.as_deref();
    let mut records = Vec::new();

    for file in &config.files {
        match load_file(Path::new(file), template).await {
            Ok(mut r) => records.append(&mut r),
            Err(e) => warn!("Failed to load channel file {}: {}", file, e),
        }
    }

    if let Some(api_url) = &config.api_url {
        match fetch_records(client, api_url, config.search.as_deref(), template).await {
            Ok(mut r) => records.append(&mut r),
            Err(e) => warn!("Failed to fetch channels from {}: {}", api_url, e),
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_adapt_record_candidate_order() {
        let record = adapt_record(
            &json!({
                "name": "CNN Brasil",
                "image": "https://img/cnn.png",
                "embed_url": "https://embed/cnn",
                "url": "https://ignored/cnn"
            }),
            None,
        )
        .unwrap();
        assert_eq!(record.name.as_deref(), Some("CNN Brasil"));
        assert_eq!(record.logo.as_deref(), Some("https://img/cnn.png"));
        assert_eq!(record.stream.as_deref(), Some("https://embed/cnn"));
        assert_eq!(record.category, None);
    }

    #[test]
    fn test_adapt_record_event_shape() {
        let record = adapt_record(
            &json!({
                "id": 7,
                "title": "Final",
                "poster": "https://img/final.jpg",
                "embeds": [{"embed_url": "https://embed/final"}]
            }),
            None,
        )
        .unwrap();
        assert_eq!(record.name.as_deref(), Some("Final"));
        assert_eq!(record.stream.as_deref(), Some("https://embed/final"));
    }

    #[test]
    fn test_adapt_record_uses_fallback_template() {
        let record = adapt_record(
            &json!({"id": "globo", "name": "Globo"}),
            Some("https://player/embed?id={id}"),
        )
        .unwrap();
        assert_eq!(record.stream.as_deref(), Some("https://player/embed?id=globo"));

        let without = adapt_record(&json!({"id": "globo", "name": "Globo"}), None).unwrap();
        assert_eq!(without.stream, None);
    }

    #[test]
    fn test_adapt_record_rejects_unknown_shapes() {
        assert!(matches!(adapt_record(&json!("Globo"), None), Err(SourceError::Unparseable(_))));
        assert!(matches!(
            adapt_record(&json!({"name": 42, "stream": "s"}), None),
            Err(SourceError::Unparseable(_))
        ));
    }

    #[test]
    fn test_parse_api_response_envelopes() {
        let bare = parse_api_response(r#"[{"name": "A", "stream": "s1"}, 5]"#, None).unwrap();
        assert_eq!(bare.len(), 1);

        let nested = parse_api_response(
            r#"{"success": true, "data": {
                "channels": [{"name": "A", "streamUrl": "s1"}],
                "events": [{"title": "E", "embeds": [{"embed_url": "s2"}]}]
            }}"#,
            None,
        )
        .unwrap();
        assert_eq!(nested.len(), 2);
        assert_eq!(nested[1].name.as_deref(), Some("E"));

        assert!(matches!(
            parse_api_response(r#"{"success": false}"#, None),
            Err(SourceError::Rejected)
        ));
        assert!(matches!(parse_api_response("not json", None), Err(SourceError::Json(_))));
    }

    #[test]
    fn test_parse_m3u() {
        let data = r#"#EXTM3U
#EXTINF:-1 tvg-logo="https://img/3sat.png" group-title="Kultur",3sat SD
#EXTVLCOPT:network-caching=1000
rtsp://192.168.178.1:554/?avm=1&freq=450&pids=0,16,17,18,20,200
#EXTINF:0,KiKA SD
https://example.org/kika.m3u8
#EXTINF:0,Orphan"#;

        let records = parse_m3u(data);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name.as_deref(), Some("3sat SD"));
        assert_eq!(records[0].category.as_deref(), Some("Kultur"));
        assert_eq!(records[0].logo.as_deref(), Some("https://img/3sat.png"));
        assert!(records[0].stream.as_deref().unwrap().starts_with("rtsp://"));
        assert_eq!(records[1].name.as_deref(), Some("KiKA SD"));
        assert_eq!(records[1].category, None);
    }

    #[test]
    fn test_parse_m3u_commas_inside_attributes() {
        let data = "#EXTM3U\n\
#EXTINF:-1 tvg-logo=\"https://img/hbo.png\" group-title=\"Filmes, Series\",HBO\n\
http://a/hbo\n\
#EXTINF:-1 group-title=\"Kids\",Tom, Jerry & Friends\n\
http://a/tom\n";

        let records = parse_m3u(data);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name.as_deref(), Some("HBO"));
        assert_eq!(records[0].category.as_deref(), Some("Filmes, Series"));
        assert_eq!(records[0].logo.as_deref(), Some("https://img/hbo.png"));
        assert_eq!(records[1].name.as_deref(), Some("Tom, Jerry & Friends"));
        assert_eq!(records[1].category.as_deref(), Some("Kids"));
    }

    #[test]
    fn test_parse_api_response_default_categories() {
        let records = parse_api_response(
            r#"{"success": true, "data": {
                "channels": [{"name": "A", "streamUrl": "s1"}, {"name": "B", "category": "Filmes", "url": "s2"}],
                "events": [{"title": "Final", "embeds": [{"embed_url": "s3"}]}]
            }}"#,
            None,
        )
        .unwrap();
        let categories: Vec<Option<&str>> = records.iter().map(|r| r.category.as_deref()).collect();
        assert_eq!(categories, vec![Some("TV"), Some("Filmes"), Some("Evento")]);

        let listed = parse_api_response(r#"{"success": true, "data": [{"name": "A", "url": "s1"}]}"#, None).unwrap();
        assert_eq!(listed[0].category.as_deref(), Some("TV"));

        let bare = parse_api_response(r#"[{"name": "A", "url": "s1"}]"#, None).unwrap();
        assert_eq!(bare[0].category, None);
    }

    #[test]
    fn test_parse_listing_detects_format() {
        let m3u = parse_listing("#EXTM3U\n#EXTINF:0,A\nhttp://a\n", None).unwrap();
        assert_eq!(m3u.len(), 1);
        let json = parse_listing(r#"[{"name": "A", "url": "http://a"}]"#, None).unwrap();
        assert_eq!(json[0].stream.as_deref(), Some("http://a"));
    }
}
