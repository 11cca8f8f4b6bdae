//! Dataset specifications
//!
//! A [`DatasetSpec`] is one named unit of work: where its files come from, how
//! remote names are matched, which partition keys are kept, how archives are
//! named and where they are delivered. Field names from older configuration
//! files are accepted as serde aliases.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::archive::NamingPolicy;
use crate::transfer::matcher::MatchRule;

/// Dataset name to type keyword, used when no explicit keyword is configured
const DEFAULT_TYPE_KEYWORDS: &[(&str, &str)] = &[
    ("ASSESSOR", "TAXASSESSOR"),
    ("RECORDER", "RECORDER"),
    ("AVM", "AVM"),
    ("FORECLOSURE", "FORECLOSURE"),
    ("PREFORECLOSURE", "PREFORECLOSURE"),
    ("PARCEL", "PARCEL"),
    ("RENTAL", "RENTAL"),
];

/// What happens to a downloaded archive once it has been processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostDownloadPolicy {
    #[default]
    Delete,
    /// Move into the processed directory
    Move,
    /// Copy into the processed directory and keep the download in place
    Copy,
}

/// What happens to intermediate filtered files once their archive is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostFilterPolicy {
    #[default]
    Delete,
    Move,
}

/// Outgoing FTP delivery mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FtpAction {
    /// Deliver and always keep the local archive
    #[default]
    Copy,
    /// Deliver and drop the local archive once the FTP upload is verified
    Move,
}

/// Where finished archives are saved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    /// Keep archives locally, skip object storage
    Local,
    /// Object storage plus a retained local copy (see `delete_local_after_remote_save`)
    Both,
    /// Object storage only
    #[default]
    Remote,
}

impl SaveMode {
    pub fn uses_object_store(self) -> bool {
        !matches!(self, SaveMode::Local)
    }
}

fn default_true() -> bool {
    true
}

fn default_delivery_folder() -> String {
    "/".to_string()
}

/// One logical dataset, immutable for the duration of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Direct sources: `https://` URLs or absolute paths on the FTP server
    #[serde(default)]
    pub urls: Vec<String>,

    /// FTP folder to browse and match against
    #[serde(default, alias = "ftp_folder")]
    pub remote_folder: Option<String>,

    /// Overrides the global partition keys when set
    #[serde(default, alias = "exstates")]
    pub partition_keys: Option<Vec<String>>,

    #[serde(default, alias = "exclude_states")]
    pub exclude_partition_keys: Vec<String>,

    #[serde(default, alias = "parser_keyword")]
    pub type_keyword: Option<String>,

    /// Match remote files on the type keyword alone
    #[serde(default, alias = "ignore_states_for_download")]
    pub ignore_partition_for_match: bool,

    /// Accept remote files that carry the keyword but no partition token
    #[serde(default)]
    pub allow_keyword_only_match: bool,

    #[serde(default, alias = "filtered_zip_prefix")]
    pub output_prefix: Option<String>,

    #[serde(default, alias = "post_process_downloaded")]
    pub post_download: PostDownloadPolicy,

    #[serde(default, alias = "post_process_filtered")]
    pub post_filter: PostFilterPolicy,

    /// Deliver archives to the outgoing FTP folder
    #[serde(default, alias = "filter_ftp_upload")]
    pub require_ftp: bool,

    #[serde(default = "default_delivery_folder", alias = "ftp_upload_folder")]
    pub delivery_folder: String,

    #[serde(default, alias = "filter_ftp_action")]
    pub ftp_action: FtpAction,

    #[serde(default)]
    pub save_mode: SaveMode,

    #[serde(default = "default_true")]
    pub delete_local_after_remote_save: bool,

    /// County FIPS codes; when set, nested `<code>.zip` archives are
    /// delivered as `fips_<code>.zip` instead of being filtered
    #[serde(default)]
    pub fips_codes: Vec<String>,
}

impl DatasetSpec {
    /// Minimal enabled dataset with every policy at its default
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            urls: Vec::new(),
            remote_folder: None,
            partition_keys: None,
            exclude_partition_keys: Vec::new(),
            type_keyword: None,
            ignore_partition_for_match: false,
            allow_keyword_only_match: false,
            output_prefix: None,
            post_download: PostDownloadPolicy::default(),
            post_filter: PostFilterPolicy::default(),
            require_ftp: false,
            delivery_folder: default_delivery_folder(),
            ftp_action: FtpAction::default(),
            save_mode: SaveMode::default(),
            delete_local_after_remote_save: true,
            fips_codes: Vec::new(),
        }
    }

    /// Partition keys in effect: the dataset override or the global set
    pub fn effective_partition_keys(&self, global: &[String]) -> Vec<String> {
        self.partition_keys
            .as_deref()
            .unwrap_or(global)
            .iter()
            .map(|key| key.trim().to_uppercase())
            .filter(|key| !key.is_empty())
            .collect()
    }

    /// Keyword that identifies this dataset's files on the remote server
    pub fn type_keyword(&self) -> String {
        if let Some(keyword) = self.type_keyword.as_deref().map(str::trim) {
            if !keyword.is_empty() {
                return keyword.to_uppercase();
            }
        }

        let name = self.name.trim().to_uppercase();
        DEFAULT_TYPE_KEYWORDS
            .iter()
            .find(|(dataset, _)| *dataset == name)
            .map(|(_, keyword)| keyword.to_string())
            .unwrap_or(name)
    }

    pub fn match_rule(&self, global_keys: &[String]) -> MatchRule {
        MatchRule {
            keyword: self.type_keyword(),
            partition_keys: self.effective_partition_keys(global_keys),
            excluded_keys: self
                .exclude_partition_keys
                .iter()
                .map(|key| key.trim().to_uppercase())
                .filter(|key| !key.is_empty())
                .collect(),
            allow_keyword_only: self.allow_keyword_only_match,
            ignore_partition: self.ignore_partition_for_match,
        }
    }

    pub fn naming_policy(&self, today: NaiveDate) -> NamingPolicy {
        match self.output_prefix.as_deref().filter(|p| !p.is_empty()) {
            Some(prefix) => NamingPolicy::Prefixed {
                prefix: prefix.to_string(),
            },
            None => NamingPolicy::Dated {
                dataset: self.name.clone(),
                date: today,
            },
        }
    }

    /// Downloads carry per-county archives rather than delimited text
    pub fn fips_mode(&self) -> bool {
        self.fips_codes.iter().any(|code| !code.trim().is_empty())
    }

    /// Where downloads for this dataset come from
    pub fn has_remote_source(&self) -> bool {
        !self.urls.is_empty() || self.remote_folder.is_some()
    }
}
