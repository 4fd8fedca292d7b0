use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// One listing as it arrives from a playlist file or an API response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChannelRecord {
    pub name: Option<String>,
    pub category: Option<String>,
    pub logo: Option<String>,
    pub stream: Option<String>,
}

/// A deduplicated channel owning every candidate stream seen for its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub unique_id: String,
    pub name: String,
    pub category: String,
    pub logo: String,
    pub streams: Vec<String>,
}

/// Labels used while building the canonical list.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_all_label")]
    pub all_label: String,
    #[serde(default = "default_uncategorized_label")]
    pub uncategorized_label: String,
    #[serde(default = "default_synonyms")]
    pub synonyms: HashMap<String, String>,
    /// Fixed category list; derived from the channels when absent.
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            all_label: default_all_label(),
            uncategorized_label: default_uncategorized_label(),
            synonyms: default_synonyms(),
            categories: None,
        }
    }
}

fn default_all_label() -> String {
    "All".to_string()
}

fn default_uncategorized_label() -> String {
    "uncategorized".to_string()
}

fn default_synonyms() -> HashMap<String, String> {
    HashMap::from([("TV Aberta".to_string(), "Canais Abertos".to_string())])
}

/// Identity key of a channel name: trimmed, whitespace removed, uppercased.
pub fn unique_id(name: &str) -> String {
    name.trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

struct ChannelBuilder {
    channel: Channel,
    // Set while the category is the fallback label rather than one a record supplied.
    category_defaulted: bool,
}

/// Builds the canonical channel list in first-seen order.
///
/// Records without a name or a stream are dropped. Later records with the
/// same identity contribute their stream as another candidate, and fill in
/// a logo or category only where none was known yet.
pub fn normalize(records: &[RawChannelRecord], config: &CatalogConfig) -> Vec<Channel> {
    let mut order: Vec<ChannelBuilder> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut dropped = 0usize;

    for record in records {
        let (Some(name), Some(stream)) = (
            non_empty(record.name.as_deref()),
            non_empty(record.stream.as_deref()),
        ) else {
            dropped += 1;
            continue;
        };

        let id = unique_id(name);
        if id.is_empty() {
            dropped += 1;
            continue;
        }

        let category = non_empty(record.category.as_deref()).map(|c| {
            config
                .synonyms
                .get(c)
                .cloned()
                .unwrap_or_else(|| c.to_string())
        });
        let logo = non_empty(record.logo.as_deref());

        match index.get(&id) {
            Some(&slot) => {
                let builder = &mut order[slot];
                builder.channel.streams.push(stream.to_string());
                if builder.channel.logo.is_empty() {
                    if let Some(logo) = logo {
                        builder.channel.logo = logo.to_string();
                    }
                }
                if builder.category_defaulted {
                    if let Some(category) = category {
                        builder.channel.category = category;
                        builder.category_defaulted = false;
                    }
                }
            }
            None => {
                index.insert(id.clone(), order.len());
                order.push(ChannelBuilder {
                    category_defaulted: category.is_none(),
                    channel: Channel {
                        unique_id: id,
                        name: name.to_string(),
                        category: category.unwrap_or_else(|| config.uncategorized_label.clone()),
                        logo: logo.unwrap_or_default().to_string(),
                        streams: vec![stream.to_string()],
                    },
                });
            }
        }
    }

    if dropped > 0 {
        debug!("Dropped {} malformed channel records", dropped);
    }

    order.into_iter().map(|b| b.channel).collect()
}

/// The all-sentinel followed by every distinct category in first-seen order.
pub fn derive_categories(channels: &[Channel], all_label: &str) -> Vec<String> {
    let mut categories = vec![all_label.to_string()];
    for channel in channels {
        if !categories.iter().any(|c| c == &channel.category) {
            categories.push(channel.category.clone());
        }
    }
    categories
}

/// Deduplicates a supplied category list and makes sure the all-sentinel leads it.
pub fn with_all_sentinel(categories: &[String], all_label: &str) -> Vec<String> {
    let mut out = vec![all_label.to_string()];
    for category in categories {
        if !out.iter().any(|c| c == category) {
            out.push(category.clone());
        }
    }
    out
}

/// Canonical channels plus the category list the session filters by.
pub fn build_lineup(records: &[RawChannelRecord], config: &CatalogConfig) -> (Vec<Channel>, Vec<String>) {
    let channels = normalize(records, config);
    let categories = match &config.categories {
        Some(fixed) => with_all_sentinel(fixed, &config.all_label),
        None => derive_categories(&channels, &config.all_label),
    };
    (channels, categories)
}
