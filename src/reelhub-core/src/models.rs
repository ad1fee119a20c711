use serde::{Deserialize, Serialize};

/// Broad category of a piece of content returned by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ContentKind {
    Movie,
    TvSeries,
    Anime,
    AsianDrama,
    Live,
    Documentary,
    #[default]
    #[serde(other)]
    Other,
}

/// A single search hit. Providers MUST fill `provider_name` with their own
/// registry name so detail loads can be routed back to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub name: String,
    pub url: String,
    #[serde(default, rename = "apiName", alias = "providerName")]
    pub provider_name: String,
    #[serde(default, rename = "type")]
    pub kind: ContentKind,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub year: Option<u32>,
    #[serde(default)]
    pub quality: Option<String>,
}

impl SearchResult {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        provider_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            provider_name: provider_name.into(),
            kind: ContentKind::default(),
            poster_url: None,
            year: None,
            quality: None,
        }
    }
}

/// One playable unit inside a [`DetailResult`]. `data` is opaque to the host
/// and handed back to the provider when playback links are requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub data: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub season: Option<u32>,
    #[serde(default)]
    pub episode: Option<u32>,
    #[serde(default)]
    pub poster_url: Option<String>,
}

/// Full detail page for a content URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailResult {
    pub name: String,
    pub url: String,
    #[serde(default, rename = "apiName", alias = "providerName")]
    pub provider_name: String,
    #[serde(default, rename = "type")]
    pub kind: ContentKind,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub plot: Option<String>,
    #[serde(default)]
    pub year: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub episodes: Vec<Episode>,
}

/// Execution substrate of a plugin package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    /// Source text evaluated in-process.
    ScriptedSource,
    /// Compiled code for a foreign runtime, executed by the sidecar.
    ForeignBytecodeArchive,
}

impl PackageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageKind::ScriptedSource => "scripted",
            PackageKind::ForeignBytecodeArchive => "foreign-archive",
        }
    }
}

/// Catalog metadata describing an installable plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    pub name: String,
    pub internal_name: String,
    /// Any change implies the installed copy must be refetched.
    pub version: i64,
    /// Download URL of the package bytes.
    pub url: String,
    /// Catalog the descriptor was published in.
    #[serde(default)]
    pub repository_url: String,
    /// Unknown until the package is fetched and classified.
    #[serde(default)]
    pub kind_hint: Option<PackageKind>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// 0 = down, 1 = ok, 2 = slow, 3 = beta.
    #[serde(default = "default_status")]
    pub status: u8,
    #[serde(default)]
    pub tv_types: Vec<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
}

fn default_status() -> u8 {
    1
}

impl PluginDescriptor {
    /// Rebuild a descriptor from what was persisted at install time.
    pub fn from_record(record: &InstalledPluginRecord) -> Self {
        Self {
            name: record.name.clone(),
            internal_name: record.internal_name.clone(),
            version: record.version,
            url: record.url.clone(),
            repository_url: record.repository_url.clone(),
            kind_hint: record.kind,
            file_size: None,
            authors: Vec::new(),
            language: None,
            description: None,
            status: default_status(),
            tv_types: Vec::new(),
            icon_url: None,
        }
    }

    pub fn is_down(&self) -> bool {
        self.status == 0
    }
}

/// Persisted record of a plugin that was installed at some point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPluginRecord {
    pub internal_name: String,
    pub name: String,
    pub url: String,
    pub version: i64,
    pub repository_url: String,
    #[serde(default)]
    pub kind: Option<PackageKind>,
    pub enabled: bool,
}

impl InstalledPluginRecord {
    pub fn from_descriptor(descriptor: &PluginDescriptor, kind: PackageKind) -> Self {
        Self {
            internal_name: descriptor.internal_name.clone(),
            name: descriptor.name.clone(),
            url: descriptor.url.clone(),
            version: descriptor.version,
            repository_url: descriptor.repository_url.clone(),
            kind: Some(kind),
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_parses_catalog_entry() {
        let json = r#"{
            "url": "https://example.org/builds/Demo.pkg",
            "status": 3,
            "version": 7,
            "apiVersion": 1,
            "name": "Demo",
            "internalName": "DemoProvider",
            "authors": ["someone"],
            "repositoryUrl": "https://example.org/repo.json",
            "language": "en",
            "tvTypes": ["Movie", "TvSeries"],
            "fileSize": 2048
        }"#;
        let descriptor: PluginDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.internal_name, "DemoProvider");
        assert_eq!(descriptor.version, 7);
        assert_eq!(descriptor.status, 3);
        assert_eq!(descriptor.file_size, Some(2048));
        assert!(descriptor.kind_hint.is_none());
    }

    #[test]
    fn unknown_content_kind_maps_to_other() {
        let json = r#"{"name":"x","url":"u","apiName":"p","type":"Torrent"}"#;
        let result: SearchResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.kind, ContentKind::Other);
        assert_eq!(result.provider_name, "p");
    }

    #[test]
    fn descriptor_rebuilt_from_record_keeps_identity() {
        let record = InstalledPluginRecord {
            internal_name: "Demo".into(),
            name: "Demo Provider".into(),
            url: "https://example.org/Demo.js".into(),
            version: 3,
            repository_url: "https://example.org/repo.json".into(),
            kind: Some(PackageKind::ScriptedSource),
            enabled: false,
        };
        let descriptor = PluginDescriptor::from_record(&record);
        assert_eq!(descriptor.internal_name, record.internal_name);
        assert_eq!(descriptor.repository_url, record.repository_url);
        assert_eq!(descriptor.kind_hint, Some(PackageKind::ScriptedSource));
    }
}
